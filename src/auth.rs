use axum::{extract::Request, http::header, middleware::Next, response::Response};
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::app_error::AppError;

/// Caller roles as minted by the identity service. Claims are trusted once
/// the token signature checks out; no re-authentication happens here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Vendor,
    Staff,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: i32,
    pub role: Role,
    /// Vendor-profile id, present only for vendor accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<i32>,
    pub exp: usize,
}

/// Identity injected for routes any authenticated role may reach.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i32,
    pub role: Role,
    pub vendor_id: Option<i32>,
}

pub fn verify_bearer(header_value: Option<&str>, secret: &[u8]) -> Result<Claims, AppError> {
    let header_value = header_value
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;
    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Authorization header must be a bearer token".into()))?;

    let token_data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;

    Ok(token_data.claims)
}

fn authenticate(req: &Request) -> Result<Claims, AppError> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| AppError::Other(anyhow::anyhow!("JWT_SECRET is not set")))?;
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    verify_bearer(header_value, secret.as_bytes())
}

/// Route layer for customer-only endpoints. Injects the customer id.
pub async fn customers_authorization(mut req: Request, next: Next) -> Result<Response, AppError> {
    let claims = authenticate(&req)?;
    if claims.role != Role::Customer {
        return Err(AppError::ForbiddenResource("Customer role required".into()));
    }
    req.extensions_mut().insert(claims.sub);
    Ok(next.run(req).await)
}

/// Route layer for vendor-only endpoints. Injects the vendor-profile id.
pub async fn vendors_authorization(mut req: Request, next: Next) -> Result<Response, AppError> {
    let claims = authenticate(&req)?;
    if claims.role != Role::Vendor {
        return Err(AppError::ForbiddenResource("Vendor role required".into()));
    }
    let vendor_id = claims
        .vendor_id
        .ok_or_else(|| AppError::ForbiddenResource("Account has no vendor profile".into()))?;
    req.extensions_mut().insert(vendor_id);
    Ok(next.run(req).await)
}

/// Route layer for endpoints any authenticated role may reach; per-resource
/// checks happen in the handler against the injected [`AuthUser`].
pub async fn viewers_authorization(mut req: Request, next: Next) -> Result<Response, AppError> {
    let claims = authenticate(&req)?;
    req.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        role: claims.role,
        vendor_id: claims.vendor_id,
    });
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &[u8] = b"test-secret";

    fn token(claims: &Claims) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn future_exp() -> usize {
        // Far enough out that test runs never cross it.
        4_102_444_800
    }

    #[test]
    fn valid_bearer_token_round_trips_claims() {
        let claims = Claims {
            sub: 42,
            role: Role::Vendor,
            vendor_id: Some(7),
            exp: future_exp(),
        };
        let header = format!("Bearer {}", token(&claims));

        let verified = verify_bearer(Some(&header), SECRET).unwrap();
        assert_eq!(verified.sub, 42);
        assert_eq!(verified.role, Role::Vendor);
        assert_eq!(verified.vendor_id, Some(7));
    }

    #[test]
    fn missing_header_is_unauthorized() {
        assert!(matches!(
            verify_bearer(None, SECRET),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn non_bearer_header_is_unauthorized() {
        assert!(matches!(
            verify_bearer(Some("Basic dXNlcjpwYXNz"), SECRET),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let claims = Claims {
            sub: 1,
            role: Role::Customer,
            vendor_id: None,
            exp: future_exp(),
        };
        let header = format!("Bearer {}", token(&claims));

        assert!(matches!(
            verify_bearer(Some(&header), b"other-secret"),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let claims = Claims {
            sub: 1,
            role: Role::Customer,
            vendor_id: None,
            exp: 1, // 1970
        };
        let header = format!("Bearer {}", token(&claims));

        assert!(matches!(
            verify_bearer(Some(&header), SECRET),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn role_claim_uses_wire_casing() {
        assert_eq!(serde_json::to_string(&Role::Customer).unwrap(), "\"CUSTOMER\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"VENDOR\"").unwrap(),
            Role::Vendor
        );
    }
}
