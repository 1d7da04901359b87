use chrono::{Duration, TimeZone, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use std::sync::Arc;
use study_portal::{
    clock::{Clock, ClockState, ManualClock},
    token::{Claims, Role, TokenCodec, TokenError, TokenType},
};
use uuid::Uuid;

const SECRET: &[u8] = b"token-test-secret";

fn setup() -> (Arc<ManualClock>, TokenCodec) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
    ));
    let codec = TokenCodec::new(SECRET, clock.clone() as ClockState);
    (clock, codec)
}

#[test]
fn test_issue_then_verify_returns_claims() {
    let (clock, codec) = setup();
    let issued = codec
        .issue(7, Role::Committee, TokenType::Access, Duration::hours(2))
        .unwrap();

    let claims = codec.verify(&issued.token, TokenType::Access).unwrap();
    assert_eq!(claims.sub, 7);
    assert_eq!(claims.role, Role::Committee);
    assert_eq!(claims.token_type, TokenType::Access);
    assert_eq!(claims.jti, issued.id);
    assert_eq!(claims.issued_at(), clock.now());
    assert_eq!(claims.expires_at(), issued.expires_at);
}

#[test]
fn test_every_token_gets_a_fresh_id() {
    let (_, codec) = setup();
    let a = codec
        .issue(1, Role::Student, TokenType::Access, Duration::hours(1))
        .unwrap();
    let b = codec
        .issue(1, Role::Student, TokenType::Access, Duration::hours(1))
        .unwrap();
    assert_ne!(a.id, b.id);
    assert_ne!(a.token, b.token);
}

#[test]
fn test_expiry_is_judged_by_the_injected_clock() {
    let (clock, codec) = setup();
    let issued = codec
        .issue(1, Role::Student, TokenType::Access, Duration::hours(2))
        .unwrap();

    clock.advance(Duration::hours(2) - Duration::seconds(1));
    assert!(codec.verify(&issued.token, TokenType::Access).is_ok());

    clock.advance(Duration::seconds(1));
    assert_eq!(
        codec.verify(&issued.token, TokenType::Access),
        Err(TokenError::Expired)
    );
}

#[test]
fn test_decode_signed_accepts_expired_tokens() {
    let (clock, codec) = setup();
    let issued = codec
        .issue(3, Role::Admin, TokenType::Access, Duration::hours(1))
        .unwrap();
    clock.advance(Duration::days(3));

    let claims = codec.decode_signed(&issued.token, TokenType::Access).unwrap();
    assert_eq!(claims.sub, 3);
}

#[test]
fn test_wrong_type_is_refused() {
    let (_, codec) = setup();
    let refresh = codec
        .issue(1, Role::Student, TokenType::Refresh, Duration::hours(48))
        .unwrap();

    assert_eq!(
        codec.verify(&refresh.token, TokenType::Access),
        Err(TokenError::WrongType {
            expected: TokenType::Access,
            found: TokenType::Refresh,
        })
    );
}

#[test]
fn test_foreign_signature_is_refused() {
    let (clock, codec) = setup();
    let other = TokenCodec::new(b"some-other-secret", clock as ClockState);
    let forged = other
        .issue(1, Role::Admin, TokenType::Access, Duration::hours(1))
        .unwrap();

    assert_eq!(
        codec.verify(&forged.token, TokenType::Access),
        Err(TokenError::BadSignature)
    );
}

#[test]
fn test_garbage_is_malformed() {
    let (_, codec) = setup();
    assert_eq!(
        codec.verify("not-a-token", TokenType::Access),
        Err(TokenError::Malformed)
    );
    assert_eq!(codec.verify("", TokenType::Access), Err(TokenError::Malformed));
}

#[test]
fn test_tampered_payload_is_refused() {
    let (_, codec) = setup();
    let issued = codec
        .issue(1, Role::Student, TokenType::Access, Duration::hours(1))
        .unwrap();

    // Swap the payload for one claiming admin, keep the original signature.
    let (_, codec_admin) = setup();
    let admin = codec_admin
        .issue(1, Role::Admin, TokenType::Access, Duration::hours(1))
        .unwrap();
    let parts: Vec<&str> = issued.token.split('.').collect();
    let admin_parts: Vec<&str> = admin.token.split('.').collect();
    let spliced = format!("{}.{}.{}", parts[0], admin_parts[1], parts[2]);

    assert_eq!(
        codec.verify(&spliced, TokenType::Access),
        Err(TokenError::BadSignature)
    );
}

#[test]
fn test_inverted_lifetime_is_malformed() {
    let (_, codec) = setup();
    let claims = Claims {
        sub: 1,
        role: Role::Student,
        token_type: TokenType::Access,
        iat: 2_000_000_000,
        exp: 1_000_000_000,
        jti: Uuid::new_v4(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET),
    )
    .unwrap();

    assert_eq!(
        codec.decode_signed(&token, TokenType::Access),
        Err(TokenError::Malformed)
    );
}

#[test]
fn test_non_positive_lifetime_cannot_be_issued() {
    let (_, codec) = setup();
    assert!(matches!(
        codec.issue(1, Role::Student, TokenType::Access, Duration::zero()),
        Err(TokenError::InvalidLifetime)
    ));
}

#[test]
fn test_role_round_trips_through_strings() {
    for role in [Role::Student, Role::Committee, Role::Admin] {
        assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
    }
    assert!("superuser".parse::<Role>().is_err());
    assert!(Role::Admin.is_privileged());
    assert!(!Role::Committee.is_privileged());
}
