use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::aliases::DieselError;
use crate::fulfillment::{CheckoutError, FulfillmentError};

/// Standard `{ data, message }` envelope wrapped around every JSON body.
#[derive(Serialize, Debug, ToSchema)]
pub struct StdResponse<T, M> {
    pub data: Option<T>,
    pub message: Option<M>,
}

impl<T: Serialize, M: Serialize> IntoResponse for StdResponse<T, M> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Service-wide error type; every handler returns `Result<_, AppError>`.
///
/// Failures are detected before mutation and surfaced synchronously; nothing
/// here is retried.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found")]
    NotFound,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    ForbiddenResource(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0} is unreachable")]
    ServiceUnreachable(String),

    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Helpers returning anyhow::Result may have tucked a real AppError
        // inside; unwrap it so the status code survives.
        match err.downcast::<AppError>() {
            Ok(app_error) => app_error,
            Err(err) => AppError::Other(err),
        }
    }
}

impl From<DieselError> for AppError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => AppError::NotFound,
            _ => AppError::Other(err.into()),
        }
    }
}

impl From<FulfillmentError> for AppError {
    fn from(err: FulfillmentError) -> Self {
        match err {
            FulfillmentError::NoItemsOwned => AppError::ForbiddenResource(err.to_string()),
            FulfillmentError::AlreadyProcessed(_) | FulfillmentError::InvalidTransition { .. } => {
                AppError::Conflict(err.to_string())
            }
            // A stored status outside the state machine is data corruption.
            FulfillmentError::UnknownStatus(_) => AppError::Other(anyhow::anyhow!(err)),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::ForbiddenResource(_) => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::ServiceUnreachable(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Other(err) => {
                tracing::error!("Internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            StdResponse::<(), String> {
                data: None,
                message: Some(message),
            },
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let res = AppError::NotFound.into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflict_maps_to_409() {
        let res = AppError::Conflict("Order has already been processed".into()).into_response();
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn diesel_not_found_becomes_app_not_found() {
        let err: AppError = DieselError::NotFound.into();
        assert!(matches!(err, AppError::NotFound));
    }

    #[test]
    fn transition_errors_map_to_conflict_and_forbidden() {
        use crate::fulfillment::OrderStatus;

        let err: AppError = FulfillmentError::AlreadyProcessed(OrderStatus::Shipped).into();
        assert!(matches!(err, AppError::Conflict(_)));

        let err: AppError = FulfillmentError::NoItemsOwned.into();
        assert!(matches!(err, AppError::ForbiddenResource(_)));

        let err: AppError = CheckoutError::EmptyCart.into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn anyhow_wrapped_app_error_keeps_its_status() {
        let err: anyhow::Error = AppError::ServiceUnreachable("CatalogService".into()).into();
        let app: AppError = err.into();
        assert!(matches!(app, AppError::ServiceUnreachable(_)));
    }

    #[test]
    fn std_response_serializes_data_and_message() {
        let body = StdResponse {
            data: Some(vec![1, 2, 3]),
            message: Some("ok"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["data"], serde_json::json!([1, 2, 3]));
        assert_eq!(json["message"], "ok");
    }
}
