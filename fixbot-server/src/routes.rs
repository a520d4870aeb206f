//! HTTP route handlers.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use fixbot::AgentError;
use fixbot::core::repo_ref::parse_issue_url;
use fixbot::core::types::{FixProposal, ProposalSummary};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Characters of assembled context returned by `GET /context`.
const CONTEXT_RESPONSE_CHARS: usize = 50_000;

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/context", get(context))
        .route("/proposals", get(list_proposals))
        .route("/proposals/{id}", get(get_proposal))
        // Mail clients follow links with GET.
        .route("/validate/{id}/approve", get(approve).post(approve))
        .route("/validate/{id}/reject", get(reject).post(reject))
        .route("/scan", post(scan))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let mail = state.registry.notifier().check_connection().await;
    Json(json!({ "status": "ok", "mail": mail }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    issue_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    success: bool,
    proposal_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    proposal: Option<FixProposal>,
    reason: String,
    confidence: u8,
}

/// POST /analyze - analyze one issue and mail a proposal if one is produced.
async fn analyze(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let req: AnalyzeRequest = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))?;
    let (repo, number) = parse_issue_url(&req.issue_url)
        .ok_or_else(|| ApiError::bad_request(format!("not an issue URL: {}", req.issue_url)))?;
    let agent = state.registry.agent_for(&repo)?;
    let analysis = agent.analyze_issue(number).await?;
    Ok(Json(AnalyzeResponse {
        success: true,
        proposal_created: analysis.proposal.is_some(),
        proposal: analysis.proposal,
        reason: analysis.reason,
        confidence: analysis.confidence,
    }))
}

#[derive(Deserialize)]
struct ContextQuery {
    repo: Option<String>,
    issue: Option<u64>,
}

/// GET /context - the context bundle the model would see.
async fn context(
    State(state): State<AppState>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<Value>, ApiError> {
    let agent = state.registry.agent_for_slug(&required_repo(query.repo)?)?;
    let issue = match query.issue {
        Some(number) => Some(agent.tracker().get_issue(number).await?),
        None => None,
    };
    let full = agent.context(issue.as_ref()).await;
    let length = full.chars().count();
    let truncated = length > CONTEXT_RESPONSE_CHARS;
    let context: String = full.chars().take(CONTEXT_RESPONSE_CHARS).collect();
    Ok(Json(json!({
        "repo": agent.repo().slug(),
        "issue": query.issue,
        "length": length,
        "truncated": truncated,
        "context": context,
    })))
}

#[derive(Deserialize)]
struct RepoQuery {
    repo: Option<String>,
}

/// GET /proposals - pending proposals for a repository.
async fn list_proposals(
    State(state): State<AppState>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<Value>, ApiError> {
    let agent = state.registry.agent_for_slug(&required_repo(query.repo)?)?;
    let proposals: Vec<ProposalSummary> =
        agent.list_pending().iter().map(ProposalSummary::from).collect();
    Ok(Json(json!({
        "repo": agent.repo().slug(),
        "count": proposals.len(),
        "proposals": proposals,
    })))
}

/// GET /proposals/{id} - one proposal in any state.
async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<FixProposal>, ApiError> {
    let agent = state.registry.agent_for_slug(&required_repo(query.repo)?)?;
    let proposal = agent.get(&id).ok_or(AgentError::NotFound(id))?;
    Ok(Json(proposal))
}

/// GET|POST /validate/{id}/approve - run the apply pipeline and open a PR.
async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RepoQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let repo = repo_from(query, &body)?;
    let agent = state.registry.agent_for_slug(&repo)?;
    let outcome = agent.approve(&id).await?;
    Ok(Json(json!({
        "success": true,
        "prUrl": outcome.pull_request.url,
        "prNumber": outcome.pull_request.number,
        "proposal": outcome.proposal,
    })))
}

/// GET|POST /validate/{id}/reject - drop a pending proposal.
async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RepoQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let repo = repo_from(query, &body)?;
    let agent = state.registry.agent_for_slug(&repo)?;
    let rejected = agent.reject(&id)?;
    Ok(Json(json!({
        "success": true,
        "message": format!("proposal {} for issue #{} rejected", rejected.id, rejected.issue_number),
    })))
}

#[derive(Deserialize)]
struct ScanQuery {
    repo: Option<String>,
    limit: Option<usize>,
    /// Comma-separated label filter.
    labels: Option<String>,
}

/// POST /scan - analyze open issues in the background.
async fn scan(
    State(state): State<AppState>,
    Query(query): Query<ScanQuery>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let server = &state.registry.config().server;
    let repos = match query.repo {
        Some(repo) => vec![repo],
        None => server.scan_repos.clone(),
    };
    if repos.is_empty() {
        warn!("scan requested without a repo and server.scan_repos is empty");
    }
    let labels = match query.labels {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        None => server.scan_labels.clone(),
    };
    let limit = query.limit.unwrap_or(server.scan_limit);

    let agents = repos
        .iter()
        .map(|slug| state.registry.agent_for_slug(slug))
        .collect::<Result<Vec<_>, _>>()?;
    let slugs: Vec<String> = agents.iter().map(|a| a.repo().slug()).collect();
    info!(repos = ?slugs, limit, "scan accepted");
    state.scan_in_background(agents, labels, limit);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "repos": slugs })),
    ))
}

fn required_repo(repo: Option<String>) -> Result<String, ApiError> {
    repo.filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("repo is required"))
}

#[derive(Deserialize, Default)]
struct RepoBody {
    repo: Option<String>,
}

/// `repo` from the query string, else from a JSON body.
fn repo_from(query: RepoQuery, body: &[u8]) -> Result<String, ApiError> {
    if let Some(repo) = query.repo.filter(|r| !r.trim().is_empty()) {
        return Ok(repo);
    }
    let parsed: RepoBody = if body.iter().all(u8::is_ascii_whitespace) {
        RepoBody::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))?
    };
    required_repo(parsed.repo)
}
