use std::env;
use std::sync::Arc;

use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use dotenv::dotenv;
use serde::Deserialize;

mod bridge;
mod builder;
mod classifier;
mod elector;
mod entities;
mod errors;
mod explore;
mod extension;
mod force_prune;
mod graph;
mod model;
mod orchestrator;
mod pruner;
mod store;
mod subgraph;
mod validator;

use bridge::{FocusObject, Incident, NetworkGraphInput, StoryEdgeInput, StoryNodeInput};
use model::{IpMappingRelation, StoryRole};
use orchestrator::Orchestrator;
use store::HttpSearchStore;

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok", "service": "chain-forge" }))
}

/// `/batch-generate`'s body is exactly an `IpMappingRelation`; the host set
/// to process is derived from its `ipAndAssociation` keys (§6), so callers
/// never submit a redundant host list.
#[post("/batch-generate")]
async fn batch_generate_handler(
    orchestrator: web::Data<Orchestrator>,
    body: web::Json<IpMappingRelation>,
) -> impl Responder {
    let ip_mapping = body.into_inner();
    let hosts: Vec<String> = ip_mapping.ip_and_association.keys().cloned().collect();
    match orchestrator.batch_generate(&ip_mapping, &hosts).await {
        Some(results) => HttpResponse::Ok().json(results),
        None => {
            println!("[batch-generate] input invalid, returning null");
            HttpResponse::Ok().json(serde_json::Value::Null)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStoryNode {
    node_id: String,
    role: StoryRole,
    ip: String,
    story_node_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStoryEdge {
    source: String,
    target: String,
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIncident {
    focus_object: String,
    target_ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeChainRequest {
    network_nodes: Vec<WireStoryNode>,
    network_edges: Vec<WireStoryEdge>,
    ip_mapping_relation: IpMappingRelation,
    incident: Option<WireIncident>,
}

#[post("/merge-chain")]
async fn merge_chain_handler(
    orchestrator: web::Data<Orchestrator>,
    body: web::Json<MergeChainRequest>,
) -> impl Responder {
    let req = body.into_inner();
    let hosts: Vec<String> = req.ip_mapping_relation.ip_and_association.keys().cloned().collect();

    let network = NetworkGraphInput {
        nodes: req
            .network_nodes
            .into_iter()
            .map(|n| StoryNodeInput {
                node_id: n.node_id,
                role: n.role,
                ip: n.ip,
                story_node_type: n.story_node_type,
            })
            .collect(),
        edges: req
            .network_edges
            .into_iter()
            .map(|e| StoryEdgeInput {
                source: e.source,
                target: e.target,
                label: e.label,
            })
            .collect(),
    };

    let incident = req.incident.and_then(|i| {
        let focus_object = match i.focus_object.to_lowercase().as_str() {
            "attacker" => Some(FocusObject::Attacker),
            "victim" => Some(FocusObject::Victim),
            _ => {
                println!("[merge-chain] unsupported focusObject: {}", i.focus_object);
                None
            }
        };
        focus_object.map(|focus_object| Incident {
            focus_object,
            target_ip: i.target_ip,
        })
    });

    match orchestrator
        .merge_chain(&network, &req.ip_mapping_relation, incident.as_ref(), &hosts)
        .await
    {
        Some(result) => HttpResponse::Ok().json(result),
        None => {
            println!("[merge-chain] input invalid, returning null");
            HttpResponse::Ok().json(serde_json::Value::Null)
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let search_store_url = env::var("SEARCH_STORE_URL").unwrap_or_else(|_| "http://localhost:9200".to_string());
    let max_extension_depth: u32 = env::var("MAX_EXTENSION_DEPTH")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(extension::DEFAULT_MAX_EXTENSION_DEPTH);
    let bind_host = env::var("BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let bind_port: u16 = env::var("BIND_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);

    println!("[chain-forge] search store: {}", search_store_url);
    println!("[chain-forge] max extension depth: {}", max_extension_depth);

    let store: Arc<dyn store::SearchStore> = Arc::new(HttpSearchStore::new(search_store_url));
    let orchestrator = web::Data::new(Orchestrator::new(store, max_extension_depth));

    println!("Starting chain-forge server on {}:{}", bind_host, bind_port);

    HttpServer::new(move || {
        let cors = actix_cors::Cors::permissive();

        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(cors)
            .app_data(orchestrator.clone())
            .service(health_check)
            .service(batch_generate_handler)
            .service(merge_chain_handler)
    })
    .bind((bind_host.as_str(), bind_port))?
    .run()
    .await
}
