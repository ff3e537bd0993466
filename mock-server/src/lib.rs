use std::time::Duration;

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Greeting {
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: u32,
    pub name: String,
}

/// The fixed, ordered list served by `GET /items`.
pub fn items() -> Vec<Item> {
    ["alpha", "bravo", "charlie", "delta"]
        .iter()
        .enumerate()
        .map(|(i, name)| Item {
            id: i as u32 + 1,
            name: name.to_string(),
        })
        .collect()
}

pub fn app() -> Router {
    Router::new()
        .route("/hello/{name}", get(hello))
        .route("/echo", post(echo))
        .route("/items", get(list_items))
        .route("/malformed", get(malformed))
        .route("/empty", get(empty))
        .route("/slow/{millis}", get(slow))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn hello(Path(name): Path<String>) -> Json<Greeting> {
    Json(Greeting {
        message: format!("hello, {name}"),
    })
}

async fn echo(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

async fn list_items() -> Json<Vec<Item>> {
    Json(items())
}

async fn malformed() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"message": "hello"#,
    )
}

async fn empty() -> StatusCode {
    StatusCode::OK
}

async fn slow(Path(millis): Path<u64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Json(serde_json::json!({ "slept": millis }))
}
