use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;

use super::{EndpointRepository, SessionRecord, SessionStore, StoredToken, TokenRepository};
use crate::models::{AuthType, EndpointRecord, TokenKey, TokenOwner};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Column values identifying one token row: (token_type, cnsi_guid, owner_kind, user_guid).
fn key_columns(key: &TokenKey) -> (&'static str, &str, &'static str, &str) {
    match key {
        TokenKey::Console { user_guid } => ("uaa", "", "user", user_guid),
        TokenKey::Endpoint {
            endpoint_guid,
            owner: TokenOwner::User(guid),
        } => ("cnsi", endpoint_guid, "user", guid),
        TokenKey::Endpoint {
            endpoint_guid,
            owner: TokenOwner::SystemShared,
        } => ("cnsi", endpoint_guid, "system", ""),
    }
}

// -- Token Operations --

#[derive(sqlx::FromRow)]
struct TokenRow {
    auth_token: String,
    refresh_token: String,
    token_expiry: Option<DateTime<Utc>>,
    auth_type: String,
    disconnected: bool,
    linked_guid: Option<String>,
}

impl TryFrom<TokenRow> for StoredToken {
    type Error = anyhow::Error;

    fn try_from(row: TokenRow) -> anyhow::Result<Self> {
        let auth_type = AuthType::parse(&row.auth_type)
            .ok_or_else(|| anyhow::anyhow!("unknown auth type in tokens table: {}", row.auth_type))?;
        Ok(StoredToken {
            auth_token: row.auth_token,
            refresh_token: row.refresh_token,
            token_expiry: row.token_expiry,
            auth_type,
            disconnected: row.disconnected,
            linked_guid: row.linked_guid,
        })
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn upsert(&self, key: &TokenKey, token: StoredToken) -> anyhow::Result<()> {
        let (token_type, cnsi_guid, owner_kind, user_guid) = key_columns(key);
        sqlx::query(
            r#"INSERT INTO tokens (token_type, cnsi_guid, owner_kind, user_guid, auth_token, refresh_token, token_expiry, auth_type, disconnected, linked_guid)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (token_type, cnsi_guid, owner_kind, user_guid) DO UPDATE
               SET auth_token = EXCLUDED.auth_token,
                   refresh_token = EXCLUDED.refresh_token,
                   token_expiry = EXCLUDED.token_expiry,
                   auth_type = EXCLUDED.auth_type,
                   disconnected = EXCLUDED.disconnected,
                   linked_guid = EXCLUDED.linked_guid,
                   updated_at = NOW()"#,
        )
        .bind(token_type)
        .bind(cnsi_guid)
        .bind(owner_kind)
        .bind(user_guid)
        .bind(&token.auth_token)
        .bind(&token.refresh_token)
        .bind(token.token_expiry)
        .bind(token.auth_type.as_str())
        .bind(token.disconnected)
        .bind(&token.linked_guid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, key: &TokenKey) -> anyhow::Result<Option<StoredToken>> {
        let (token_type, cnsi_guid, owner_kind, user_guid) = key_columns(key);
        let row = sqlx::query_as::<_, TokenRow>(
            r#"SELECT auth_token, refresh_token, token_expiry, auth_type, disconnected, linked_guid
               FROM tokens
               WHERE token_type = $1 AND cnsi_guid = $2 AND owner_kind = $3 AND user_guid = $4"#,
        )
        .bind(token_type)
        .bind(cnsi_guid)
        .bind(owner_kind)
        .bind(user_guid)
        .fetch_optional(&self.pool)
        .await?;
        row.map(StoredToken::try_from).transpose()
    }

    async fn remove(&self, key: &TokenKey) -> anyhow::Result<bool> {
        let (token_type, cnsi_guid, owner_kind, user_guid) = key_columns(key);
        let result = sqlx::query(
            "DELETE FROM tokens WHERE token_type = $1 AND cnsi_guid = $2 AND owner_kind = $3 AND user_guid = $4",
        )
        .bind(token_type)
        .bind(cnsi_guid)
        .bind(owner_kind)
        .bind(user_guid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- Endpoint Operations --

#[derive(sqlx::FromRow)]
struct EndpointRow {
    guid: String,
    name: String,
    cnsi_type: String,
    api_endpoint: String,
    auth_endpoint: String,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    skip_ssl_validation: bool,
    sso_allowed: bool,
}

impl From<EndpointRow> for EndpointRecord {
    fn from(row: EndpointRow) -> Self {
        EndpointRecord {
            guid: row.guid,
            name: row.name,
            cnsi_type: row.cnsi_type,
            api_endpoint: row.api_endpoint,
            authorization_endpoint: row.auth_endpoint,
            token_endpoint: row.token_endpoint,
            client_id: row.client_id,
            client_secret: row.client_secret,
            skip_ssl_validation: row.skip_ssl_validation,
            sso_allowed: row.sso_allowed,
        }
    }
}

const ENDPOINT_COLUMNS: &str = "guid, name, cnsi_type, api_endpoint, auth_endpoint, token_endpoint, client_id, client_secret, skip_ssl_validation, sso_allowed";

#[async_trait]
impl EndpointRepository for PgStore {
    async fn find(&self, guid: &str) -> anyhow::Result<Option<EndpointRecord>> {
        let row = sqlx::query_as::<_, EndpointRow>(&format!(
            "SELECT {} FROM cnsis WHERE guid = $1",
            ENDPOINT_COLUMNS
        ))
        .bind(guid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EndpointRecord::from))
    }

    async fn list(&self) -> anyhow::Result<Vec<EndpointRecord>> {
        let rows = sqlx::query_as::<_, EndpointRow>(&format!(
            "SELECT {} FROM cnsis ORDER BY name ASC",
            ENDPOINT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EndpointRecord::from).collect())
    }

    async fn save(&self, ep: &EndpointRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO cnsis (guid, name, cnsi_type, api_endpoint, auth_endpoint, token_endpoint, client_id, client_secret, skip_ssl_validation, sso_allowed)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (guid) DO UPDATE
               SET name = EXCLUDED.name,
                   cnsi_type = EXCLUDED.cnsi_type,
                   api_endpoint = EXCLUDED.api_endpoint,
                   auth_endpoint = EXCLUDED.auth_endpoint,
                   token_endpoint = EXCLUDED.token_endpoint,
                   client_id = EXCLUDED.client_id,
                   client_secret = EXCLUDED.client_secret,
                   skip_ssl_validation = EXCLUDED.skip_ssl_validation,
                   sso_allowed = EXCLUDED.sso_allowed"#,
        )
        .bind(&ep.guid)
        .bind(&ep.name)
        .bind(&ep.cnsi_type)
        .bind(&ep.api_endpoint)
        .bind(&ep.authorization_endpoint)
        .bind(&ep.token_endpoint)
        .bind(&ep.client_id)
        .bind(&ep.client_secret)
        .bind(ep.skip_ssl_validation)
        .bind(ep.sso_allowed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_sso_allowed(&self, guid: &str, allowed: bool) -> anyhow::Result<()> {
        let result = sqlx::query("UPDATE cnsis SET sso_allowed = $2 WHERE guid = $1")
            .bind(guid)
            .bind(allowed)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("endpoint {} not registered", guid);
        }
        Ok(())
    }
}

// -- Session Operations --

#[derive(sqlx::FromRow)]
struct SessionRow {
    data: sqlx::types::Json<Map<String, Value>>,
    expires_on: DateTime<Utc>,
}

#[async_trait]
impl SessionStore for PgStore {
    async fn load(&self, id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT data, expires_on FROM sessions WHERE id = $1 AND expires_on > NOW()",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| SessionRecord {
            values: r.data.0,
            expires_on: r.expires_on,
        }))
    }

    async fn save(&self, id: &str, record: &SessionRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO sessions (id, data, expires_on) VALUES ($1, $2, $3)
               ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, expires_on = EXCLUDED.expires_on"#,
        )
        .bind(id)
        .bind(sqlx::types::Json(&record.values))
        .bind(record.expires_on)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_on <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
