//! HTTP 处理函数
//!
//! 请求体统一按字节读取后用 serde_json 解析，这样解析失败也返回结构化错误体，
//! 并且不要求调用方设置 Content-Type。

use super::AppState;
use super::dto::{
    DeregisterRequest, HealthResponse, ModifyBlockLengthRequest, ModifyGroupRequest,
    RegisterRequest, RegisterResponse, SelectQuery, SelectResponse, SvcInfoQuery,
    UpdateConfigRequest, VersionQuery, VersionsResponse,
};
use crate::control::BlockLengthScope;
use crate::error::{AllocatorError, Result};
use crate::store::{MemberSpec, ServiceConfig};
use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use http::{StatusCode, header};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::debug;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

fn parse_query<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| AllocatorError::deserialization(rejection.body_text()))
}

/// POST /updateConfigMap
pub async fn update_config_map(
    State(state): State<AppState>,
    query: std::result::Result<Query<VersionQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Json<VersionsResponse>> {
    let expected = parse_query(query)?.version;
    let request: UpdateConfigRequest = parse_body(&body)?;

    let mut services: BTreeMap<String, Vec<MemberSpec>> = BTreeMap::new();
    for (name, entries) in &request {
        let specs = entries
            .iter()
            .map(|entry| entry.to_spec(name))
            .collect::<Result<Vec<_>>>()?;
        services.insert(name.clone(), specs);
    }

    let versions = state.control.replace_services(&services, expected)?;
    Ok(Json(VersionsResponse { versions }))
}

/// POST /modify-group
pub async fn modify_group(
    State(state): State<AppState>,
    query: std::result::Result<Query<VersionQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Json<VersionsResponse>> {
    let expected = parse_query(query)?.version;
    let request: ModifyGroupRequest = parse_body(&body)?;
    let versions = state.control.resize_groups(&request, expected)?;
    Ok(Json(VersionsResponse { versions }))
}

/// POST /modify-block-len
pub async fn modify_block_length(
    State(state): State<AppState>,
    query: std::result::Result<Query<VersionQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Json<VersionsResponse>> {
    let expected = parse_query(query)?.version;
    let scope = match parse_body::<ModifyBlockLengthRequest>(&body)? {
        ModifyBlockLengthRequest::All(block_length) => BlockLengthScope::All(block_length),
        ModifyBlockLengthRequest::Services(services) => BlockLengthScope::Services(services),
    };
    let versions = state.control.set_block_length(&scope, expected)?;
    Ok(Json(VersionsResponse { versions }))
}

/// GET /svc-info?name=svc
pub async fn svc_info(
    State(state): State<AppState>,
    query: std::result::Result<Query<SvcInfoQuery>, QueryRejection>,
) -> Result<Json<ServiceConfig>> {
    let query = parse_query(query)?;
    let config = state.store.get(&query.name)?;
    Ok(Json(config.as_ref().clone()))
}

/// GET /select?service=svc&key=k
pub async fn select(
    State(state): State<AppState>,
    query: std::result::Result<Query<SelectQuery>, QueryRejection>,
) -> Result<Json<SelectResponse>> {
    let query = parse_query(query)?;
    let selection = state.engine.select(&query.service, &query.key)?;
    debug!(
        service = %query.service,
        key = %query.key,
        address = %selection.member.address,
        "Selected member"
    );
    Ok(Json(selection.into()))
}

/// POST /registry/register
pub async fn register(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RegisterResponse>> {
    let request: RegisterRequest = parse_body(&body)?;
    let id = request
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    state
        .registry
        .register(&request.name, &id, &request.address)
        .await?;
    Ok(Json(RegisterResponse {
        name: request.name,
        id,
        address: request.address,
    }))
}

/// POST /registry/deregister
pub async fn deregister(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode> {
    let request: DeregisterRequest = parse_body(&body)?;
    state.registry.deregister(&request.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        services: state.store.names().len(),
        strategy: state.engine.strategy_name(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let body = state.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
