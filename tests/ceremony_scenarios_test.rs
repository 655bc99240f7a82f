// End-to-end ceremonies through the passkey façade with a software authenticator
use std::sync::Arc;

use chrono::{Duration, Utc};
use passgate::error::ErrorKind;
use passgate::passkey::service::{MSG_AUTHENTICATION_FAILED, MSG_DELETED, MSG_REGISTERED};
use passgate::passkey::{
    AuthenticateRequest, CeremonyType, DeleteRequest, MemoryBlobStore, PasskeyService,
    PasskeyToggles, Principal, RegisterRequest, SessionContext,
};
use passgate::testing::{test_policy, SoftAuthenticator, TEST_ORIGIN};
use passgate::webauthn::encoding;
use serde_json::json;

fn service() -> PasskeyService {
    PasskeyService::new(
        PasskeyToggles::default(),
        test_policy(),
        Arc::new(MemoryBlobStore::new()),
    )
}

fn alice() -> Principal {
    Principal::new("alice").unwrap()
}

async fn register(service: &PasskeyService, authenticator: &SoftAuthenticator) {
    let challenge = service
        .challenges()
        .issue(alice().as_str(), CeremonyType::Registration)
        .unwrap();
    let response = authenticator.packed_registration(&challenge.value, TEST_ORIGIN);
    let result = service
        .register(
            &alice(),
            RegisterRequest {
                credential_data: Some(json!(response)),
                name: Some("Security key".into()),
            },
        )
        .await;
    assert_eq!(result.message.as_deref(), Some(MSG_REGISTERED), "{result:?}");
}

async fn authenticate(
    service: &PasskeyService,
    authenticator: &SoftAuthenticator,
    session: &mut SessionContext,
    counter: u32,
) -> passgate::PasskeyResponse {
    let challenge = service
        .challenges()
        .issue(&session.challenge_subject(), CeremonyType::Authentication)
        .unwrap();
    let assertion = authenticator.assertion(&challenge.value, TEST_ORIGIN, counter, None);
    service
        .authenticate(
            session,
            AuthenticateRequest {
                assertion_data: Some(json!(assertion)),
            },
        )
        .await
}

async fn stored_counter(service: &PasskeyService, credential_id: &[u8]) -> u32 {
    service
        .store()
        .find_by_credential_id(&alice(), credential_id)
        .await
        .unwrap()
        .expect("credential stored")
        .sign_count
}

#[tokio::test]
async fn test_register_stores_record_with_zero_counter() {
    let service = service();
    let authenticator = SoftAuthenticator::es256().with_credential_id(b"cred-1");
    register(&service, &authenticator).await;

    let records = service.store().list_for_principal(&alice()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].credential_id, b"cred-1");
    assert_eq!(records[0].sign_count, 0);
    assert_eq!(records[0].attestation_format.as_deref(), Some("packed"));
}

#[tokio::test]
async fn test_counter_advances_then_replay_is_detected() {
    let service = service();
    let authenticator = SoftAuthenticator::es256().with_credential_id(b"cred-1");
    register(&service, &authenticator).await;
    service
        .store()
        .update_counter(&alice(), b"cred-1", 3, Utc::now())
        .await
        .unwrap();

    let mut session = SessionContext::new(Some(alice()));
    let result = authenticate(&service, &authenticator, &mut session, 5).await;
    assert!(result.success, "{result:?}");
    assert!(session.passkey_authenticated);
    assert_eq!(stored_counter(&service, b"cred-1").await, 5);

    // Same counter under a fresh challenge
    let mut session = SessionContext::new(Some(alice()));
    let result = authenticate(&service, &authenticator, &mut session, 5).await;
    assert!(!result.success);
    assert_eq!(result.error, Some(ErrorKind::ReplayDetected));
    assert_eq!(result.message.as_deref(), Some(MSG_AUTHENTICATION_FAILED));
    assert!(!session.passkey_authenticated);
    assert_eq!(stored_counter(&service, b"cred-1").await, 5);
}

#[tokio::test]
async fn test_resubmitted_assertion_is_rejected() {
    let service = service();
    let authenticator = SoftAuthenticator::es256();
    register(&service, &authenticator).await;

    let mut session = SessionContext::new(Some(alice()));
    let challenge = service
        .challenges()
        .issue(alice().as_str(), CeremonyType::Authentication)
        .unwrap();
    let assertion = json!(authenticator.assertion(&challenge.value, TEST_ORIGIN, 1, None));

    for expected in [true, false] {
        let result = service
            .authenticate(
                &mut session,
                AuthenticateRequest {
                    assertion_data: Some(assertion.clone()),
                },
            )
            .await;
        assert_eq!(result.success, expected);
    }
    assert_eq!(stored_counter(&service, &authenticator.credential_id()).await, 1);
}

#[tokio::test]
async fn test_expired_challenge_is_rejected() {
    let service = service();
    let authenticator = SoftAuthenticator::es256();
    register(&service, &authenticator).await;

    let timeout = i64::try_from(service.policy().timeout_ms).unwrap();
    let challenge = service
        .challenges()
        .issue_at(
            alice().as_str(),
            CeremonyType::Authentication,
            Utc::now() - Duration::milliseconds(timeout + 1),
        )
        .unwrap();
    let assertion = authenticator.assertion(&challenge.value, TEST_ORIGIN, 1, None);

    let mut session = SessionContext::new(Some(alice()));
    let result = service
        .authenticate(
            &mut session,
            AuthenticateRequest {
                assertion_data: Some(json!(assertion)),
            },
        )
        .await;
    assert_eq!(result.error, Some(ErrorKind::ChallengeInvalid));
    assert_eq!(stored_counter(&service, &authenticator.credential_id()).await, 0);
}

#[tokio::test]
async fn test_list_without_credentials_is_empty() {
    let service = service();
    let result = service.list(&alice()).await;
    assert!(result.success);
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({"success": true, "passkeys": []})
    );
}

#[tokio::test]
async fn test_counter_staying_at_zero_is_tolerated() {
    let service = service();
    let authenticator = SoftAuthenticator::es256();
    register(&service, &authenticator).await;

    for _ in 0..2 {
        let mut session = SessionContext::new(Some(alice()));
        let result = authenticate(&service, &authenticator, &mut session, 0).await;
        assert!(result.success, "{result:?}");
    }
    let record = service
        .store()
        .find_by_credential_id(&alice(), &authenticator.credential_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.sign_count, 0);
    assert!(record.last_used.is_some());
}

#[tokio::test]
async fn test_challenge_validates_once() {
    let service = service();
    let challenge = service
        .challenges()
        .issue("alice", CeremonyType::Registration)
        .unwrap();

    service
        .challenges()
        .consume("alice", CeremonyType::Registration, &challenge.value)
        .unwrap();
    let err = service
        .challenges()
        .consume("alice", CeremonyType::Registration, &challenge.value)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChallengeAlreadyUsed);
}

#[tokio::test]
async fn test_concurrent_submissions_of_one_assertion() {
    let service = service();
    let authenticator = SoftAuthenticator::es256();
    register(&service, &authenticator).await;

    let challenge = service
        .challenges()
        .issue(alice().as_str(), CeremonyType::Authentication)
        .unwrap();
    let assertion = json!(authenticator.assertion(&challenge.value, TEST_ORIGIN, 1, None));

    let mut first = SessionContext::new(Some(alice()));
    let mut second = SessionContext::new(Some(alice()));
    let (a, b) = tokio::join!(
        service.authenticate(
            &mut first,
            AuthenticateRequest {
                assertion_data: Some(assertion.clone()),
            },
        ),
        service.authenticate(
            &mut second,
            AuthenticateRequest {
                assertion_data: Some(assertion.clone()),
            },
        ),
    );
    assert_eq!(u8::from(a.success) + u8::from(b.success), 1);
    assert_eq!(stored_counter(&service, &authenticator.credential_id()).await, 1);
}

#[tokio::test]
async fn test_foreign_origin_fails_despite_valid_signature() {
    let service = service();
    let authenticator = SoftAuthenticator::es256();
    register(&service, &authenticator).await;

    let challenge = service
        .challenges()
        .issue(alice().as_str(), CeremonyType::Authentication)
        .unwrap();
    let assertion = authenticator.assertion(&challenge.value, "https://localhost.evil.test", 1, None);

    let mut session = SessionContext::new(Some(alice()));
    let result = service
        .authenticate(
            &mut session,
            AuthenticateRequest {
                assertion_data: Some(json!(assertion)),
            },
        )
        .await;
    assert_eq!(result.error, Some(ErrorKind::OriginMismatch));
    assert_eq!(result.message.as_deref(), Some(MSG_AUTHENTICATION_FAILED));
}

#[tokio::test]
async fn test_list_never_exposes_key_material() {
    let service = service();
    register(&service, &SoftAuthenticator::es256()).await;
    register(&service, &SoftAuthenticator::rs256()).await;

    let result = service.list(&alice()).await;
    let passkeys = result.data["passkeys"].as_array().unwrap();
    assert_eq!(passkeys.len(), 2);
    for passkey in passkeys {
        let fields: Vec<&str> = passkey
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert!(!fields.contains(&"publicKey"));
        assert!(!fields.contains(&"userHandle"));
        assert!(fields.contains(&"id"));
        assert!(fields.contains(&"name"));
    }
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let service = service();
    let authenticator = SoftAuthenticator::es256();
    register(&service, &authenticator).await;

    let result = service
        .delete(
            &alice(),
            DeleteRequest {
                credential_id: Some(encoding::encode(b"no-such-credential")),
            },
        )
        .await;
    assert_eq!(result.message.as_deref(), Some(MSG_DELETED));
    assert!(service.store().has_credentials(&alice()).await.unwrap());

    for _ in 0..2 {
        let result = service
            .delete(
                &alice(),
                DeleteRequest {
                    credential_id: Some(encoding::encode(&authenticator.credential_id())),
                },
            )
            .await;
        assert!(result.success);
    }
    assert!(!service.store().has_credentials(&alice()).await.unwrap());
}
