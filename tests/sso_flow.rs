//! SSO redirect flows through the shared callback.

mod common;

use chrono::Utc;
use common::{endpoint, jwt, token_response, user_guid, Harness, CONSOLE_STATE};
use jetstream::errors::AppError;
use jetstream::sso::{CallbackParams, LOGGED_OUT_LOCATION};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn sso_harness() -> Harness {
    Harness::with_config(|c| c.sso.enabled = true).await
}

fn params(state: Option<&str>, code: Option<&str>, guid: Option<&str>) -> CallbackParams {
    CallbackParams {
        state: state.map(String::from),
        code: code.map(String::from),
        guid: guid.map(String::from),
    }
}

mod initiate_tests {
    use super::*;

    #[tokio::test]
    async fn test_login_redirects_to_uaa_authorize() {
        let h = sso_harness().await;
        let location = h.state.sso.initiate_login(Some(CONSOLE_STATE)).unwrap();
        assert_eq!(
            location,
            format!(
                "{}/oauth/authorize?response_type=code&client_id=cf&redirect_uri=\
                 https%3A%2F%2Fconsole.example.com%2Fpp%2Fv1%2Fauth%2Fsso_login_callback\
                 %3Fstate%3Dhttps%253A%252F%252Fconsole.example.com",
                h.uaa.uri()
            )
        );
    }

    #[tokio::test]
    async fn test_logout_goes_through_uaa_only_with_option() {
        let h = sso_harness().await;
        assert_eq!(
            h.state.sso.initiate_logout(Some(CONSOLE_STATE)).unwrap(),
            LOGGED_OUT_LOCATION
        );

        let h = Harness::with_config(|c| {
            c.sso.enabled = true;
            c.sso.options = vec!["logout".into()];
        })
        .await;
        let location = h.state.sso.initiate_logout(Some(CONSOLE_STATE)).unwrap();
        assert!(location.starts_with(&format!("{}/logout.do?client_id=cf&redirect=", h.uaa.uri())));
        assert!(location.ends_with("%3Fstate%3Dlogout"));
    }

    #[tokio::test]
    async fn test_disabled_sso_is_not_found() {
        let h = Harness::new().await;
        assert!(matches!(
            h.state.sso.initiate_login(Some(CONSOLE_STATE)),
            Err(AppError::SsoDisabled)
        ));
        assert!(matches!(
            h.state.sso.initiate_logout(Some(CONSOLE_STATE)),
            Err(AppError::SsoDisabled)
        ));

        // The callback itself stays reachable.
        let redirect = h
            .state
            .sso
            .callback(params(Some("logout"), None, None), None)
            .await
            .unwrap();
        assert_eq!(redirect.location, LOGGED_OUT_LOCATION);
    }

    #[tokio::test]
    async fn test_missing_state_is_rejected_before_redirect() {
        let h = sso_harness().await;
        assert!(matches!(
            h.state.sso.initiate_login(None),
            Err(AppError::MissingState)
        ));
        let err = h
            .state
            .sso
            .callback(params(None, Some("abc"), Some("e1")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingState));
        assert_eq!(err.status().as_u16(), 401);
    }
}

mod console_callback_tests {
    use super::*;

    #[tokio::test]
    async fn test_code_login_redirects_to_state_with_session() {
        let h = sso_harness().await;
        let access = jwt("u-alice", "alice", &["openid"], Utc::now().timestamp() + 600);
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .respond_with(token_response(&access, "r-1", "openid"))
            .expect(1)
            .mount(&h.uaa)
            .await;

        let redirect = h
            .state
            .sso
            .callback(params(Some(CONSOLE_STATE), Some("abc"), None), None)
            .await
            .unwrap();
        assert_eq!(redirect.location, CONSOLE_STATE);
        let session = redirect.session.unwrap();
        assert_eq!(session.user_guid(), Some("u-alice"));
    }

    #[tokio::test]
    async fn test_failed_code_login_redirects_with_message() {
        let h = sso_harness().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Bad code",
            })))
            .mount(&h.uaa)
            .await;

        let redirect = h
            .state
            .sso
            .callback(params(Some(CONSOLE_STATE), Some("stale"), None), None)
            .await
            .unwrap();
        assert_eq!(
            redirect.location,
            format!("{}/login?SSO_Message=Bad+code", CONSOLE_STATE)
        );
        assert!(redirect.session.is_none());
    }
}

mod endpoint_callback_tests {
    use super::*;

    async fn cf_endpoint(h: &Harness, token_status: u16) -> (MockServer, MockServer) {
        let cf_uaa = MockServer::start().await;
        let access = jwt("cf-alice", "alice", &[], Utc::now().timestamp() + 600);
        let response = if token_status == 200 {
            token_response(&access, "cf-r", "")
        } else {
            ResponseTemplate::new(token_status).set_body_string("{}")
        };
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(response)
            .mount(&cf_uaa)
            .await;

        let cc = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/info"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&cc)
            .await;

        h.add_endpoint(endpoint("e1", "cf", &cc.uri(), &cf_uaa.uri())).await;
        (cf_uaa, cc)
    }

    #[tokio::test]
    async fn test_endpoint_code_connects_and_reports_ok() {
        let h = sso_harness().await;
        h.login("alice", &["openid"]).await;
        let _servers = cf_endpoint(&h, 200).await;
        let alice = user_guid("alice");

        let redirect = h
            .state
            .sso
            .callback(params(Some(CONSOLE_STATE), Some("abc"), Some("e1")), Some(&alice))
            .await
            .unwrap();
        assert_eq!(redirect.location, "/endpoints?cnsi_guid=e1&status=ok");
        assert!(h
            .state
            .connector
            .effective_token("e1", &alice)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_endpoint_code_failure_reports_fail() {
        let h = sso_harness().await;
        h.login("alice", &["openid"]).await;
        let _servers = cf_endpoint(&h, 401).await;

        let redirect = h
            .state
            .sso
            .callback(
                params(Some(CONSOLE_STATE), Some("abc"), Some("e1")),
                Some(&user_guid("alice")),
            )
            .await
            .unwrap();
        assert_eq!(redirect.location, "/endpoints?cnsi_guid=e1&status=fail");
    }

    #[tokio::test]
    async fn test_endpoint_without_code_starts_authorize() {
        let h = sso_harness().await;
        let (cf_uaa, _cc) = cf_endpoint(&h, 200).await;

        let redirect = h
            .state
            .sso
            .callback(params(Some(CONSOLE_STATE), None, Some("e1")), None)
            .await
            .unwrap();
        assert!(redirect.location.starts_with(&format!(
            "{}/oauth/authorize?response_type=code&client_id=endpoint-client&redirect_uri=",
            cf_uaa.uri()
        )));
        assert!(redirect.location.ends_with("%26guid%3De1"));
    }
}
