//! HTTP 控制接口
//!
//! - `POST /updateConfigMap`、`/modify-group`、`/modify-block-len`：修改配置
//! - `GET /svc-info`、`/select`：查询配置和试算分配
//! - `POST /registry/register`、`/registry/deregister`：手动注册 / 注销实例
//! - `GET /health`、`/metrics`

pub mod dto;
mod handlers;

use crate::allocator::AllocationEngine;
use crate::control::ControlApi;
use crate::metrics::AllocatorMetrics;
use crate::registry::SharedRegistry;
use crate::store::ConfigStore;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// 处理函数共享的状态
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub engine: Arc<AllocationEngine>,
    pub control: Arc<ControlApi>,
    pub registry: SharedRegistry,
    pub metrics: Arc<AllocatorMetrics>,
}

/// 创建路由
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/updateConfigMap", post(handlers::update_config_map))
        .route("/modify-group", post(handlers::modify_group))
        .route("/modify-block-len", post(handlers::modify_block_length))
        .route("/svc-info", get(handlers::svc_info))
        .route("/select", get(handlers::select))
        .route("/registry/register", post(handlers::register))
        .route("/registry/deregister", post(handlers::deregister))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
