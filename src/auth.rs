use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Basic, Authorization},
    TypedHeader,
};

use crate::errors::CatalogError;
use crate::state::AppState;

/// Basic-auth guard for the upload routes.
pub async fn require_uploader(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    request: Request,
    next: Next,
) -> Result<Response, CatalogError> {
    let Some(TypedHeader(Authorization(creds))) = auth else {
        return Err(CatalogError::Unauthorized);
    };

    if !credentials_match(
        creds.username(),
        creds.password(),
        &state.config.upload_user,
        &state.config.upload_pass,
    ) {
        tracing::warn!("Rejected upload credentials for user {:?}", creds.username());
        return Err(CatalogError::Unauthorized);
    }

    Ok(next.run(request).await)
}

fn credentials_match(user: &str, pass: &str, expected_user: &str, expected_pass: &str) -> bool {
    user == expected_user && pass == expected_pass
}

#[cfg(test)]
mod tests {
    use super::credentials_match;

    #[test]
    fn both_parts_must_match() {
        assert!(credentials_match("admin", "pw", "admin", "pw"));
        assert!(!credentials_match("admin", "nope", "admin", "pw"));
        assert!(!credentials_match("root", "pw", "admin", "pw"));
    }
}
