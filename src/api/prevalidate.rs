//! Form pre-validation: runs every field check and reports all failures.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;

use super::error::ApiError;
use super::ApiJson;
use super::validation::{validate_entity, EntityKind, ValidationError};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct PrevalidateResponse {
    pub valid: bool,
    pub entity: EntityKind,
    pub errors: Vec<ValidationError>,
}

pub async fn validate_form(
    State(state): State<Arc<AppState>>,
    Path(entity): Path<String>,
    ApiJson(body): ApiJson<Map<String, Value>>,
) -> Result<Json<PrevalidateResponse>, ApiError> {
    let entity = EntityKind::from_str(&entity).map_err(ApiError::not_found)?;
    let errors = validate_entity(entity, &body, state.config.validation.comments_min_length);

    Ok(Json(PrevalidateResponse {
        valid: errors.is_empty(),
        entity,
        errors,
    }))
}
