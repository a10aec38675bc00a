//! URL-rewriter admin surface (§6), backed by [`crate::url_rewrite::RuleTable`].

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::url_rewrite::{self, RewriteRule};

use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct RuleView {
    pub source_host: String,
    pub target_host: String,
    pub scheme: String,
}

pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<Vec<RuleView>> {
    let rules = state.rule_table.load();
    let views = rules
        .iter()
        .map(|(source, rule)| RuleView {
            source_host: source.clone(),
            target_host: rule.target_host.clone(),
            scheme: rule.scheme.clone(),
        })
        .collect();
    Json(views)
}

#[derive(Debug, Deserialize)]
pub struct SetRuleBody {
    pub source_host: String,
    pub target_host: String,
    pub scheme: String,
}

pub async fn set_rule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetRuleBody>,
) -> StatusCode {
    state.rule_table.set(
        body.source_host,
        RewriteRule {
            target_host: body.target_host,
            scheme: body.scheme,
        },
    );
    StatusCode::NO_CONTENT
}

pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(host): Path<String>,
) -> StatusCode {
    if state.rule_table.remove(&host) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Debug, Deserialize)]
pub struct TransformBody {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct TransformResponse {
    pub url: String,
}

pub async fn transform(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TransformBody>,
) -> Json<TransformResponse> {
    let rules = state.rule_table.load();
    let rewritten = url_rewrite::rewrite(&body.url, &rules);
    Json(TransformResponse { url: rewritten })
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub matches: bool,
    pub rewritten: String,
}

pub async fn check(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CheckQuery>,
) -> Json<CheckResponse> {
    let rules = state.rule_table.load();
    let rewritten = url_rewrite::rewrite(&query.url, &rules);
    let matches = rewritten != query.url;
    Json(CheckResponse { matches, rewritten })
}
