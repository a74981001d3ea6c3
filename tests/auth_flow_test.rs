use std::sync::Arc;

use telegraph_server::auth::{AuthModules, InternalAuthenticator};
use telegraph_server::credentials::CredentialStore;
use telegraph_server::error::Error;
use telegraph_server::session::SessionManager;

fn provision(username: &str, password: &str) -> AuthModules {
    let mut credentials = CredentialStore::new();
    credentials.add_user(username, password).unwrap();

    let mut modules = AuthModules::new();
    modules.register(Arc::new(InternalAuthenticator::new(Arc::new(credentials))));
    modules
}

#[tokio::test]
async fn login_issues_a_session_cookie() {
    let modules = provision("alice", "correct horse");
    let sessions = SessionManager::new(3600);

    let token = modules
        .authenticate("internal", "alice", "correct horse", &sessions)
        .await
        .unwrap();

    assert_eq!(sessions.validate(&token).await.as_deref(), Some("alice"));

    let cookie = sessions.cookie_header(&token).await.unwrap();
    assert!(cookie.contains(&token));
    assert!(cookie.contains("Expires="));
}

#[tokio::test]
async fn failed_login_issues_nothing() {
    let modules = provision("alice", "correct horse");
    let sessions = SessionManager::new(3600);

    let result = modules
        .authenticate("internal", "alice", "battery staple", &sessions)
        .await;
    assert!(matches!(result, Err(Error::Authentication(_))));

    let result = modules
        .authenticate("internal", "nobody", "correct horse", &sessions)
        .await;
    assert!(matches!(result, Err(Error::Authentication(_))));
}

#[tokio::test]
async fn logout_invalidates_the_token() {
    let modules = provision("alice", "correct horse");
    let sessions = SessionManager::new(3600);

    let token = modules
        .authenticate("internal", "alice", "correct horse", &sessions)
        .await
        .unwrap();

    sessions.kill(&token).await;
    assert_eq!(sessions.validate(&token).await, None);
}
