use std::convert::Infallible;

use db::{DbError, DecodeError};
use reqwest::Error as ReqwestError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;
use thiserror::Error;
use tokio::task::JoinError;
use warp::{self, http, hyper::StatusCode};

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Deserialization Error: {0}")]
    DeserializationError(#[from] SerdeError),

    #[error("Reqwest Error: {0}")]
    ReqwestError(#[from] ReqwestError),

    #[error("Tokio Join Error: {0}")]
    TokioJoinError(#[from] JoinError),

    #[error("Database Error: {0}")]
    DbError(#[from] DbError),

    #[error("Diesel Error: {0}")]
    DieselError(#[from] diesel::result::Error),

    #[error("Decode Error: {0}")]
    DecodeError(#[from] DecodeError),

    #[error("Object Store Error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("Node Error: {0}")]
    NodeError(String),
}

impl warp::reject::Reject for IndexerError {}

pub(crate) async fn handle_rejection(
    err: warp::reject::Rejection,
) -> Result<impl warp::Reply, Infallible> {
    let (code, message): (StatusCode, &str) = match err.find() {
        Some(IndexerError::DeserializationError(_)) => {
            (StatusCode::BAD_REQUEST, "Deserialization Error")
        }
        Some(IndexerError::ReqwestError(_)) => (StatusCode::BAD_GATEWAY, "Node Request Error"),
        Some(IndexerError::TokioJoinError(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "Join Error"),
        Some(IndexerError::DbError(_)) | Some(IndexerError::DieselError(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error")
        }
        Some(IndexerError::DecodeError(_)) => (StatusCode::BAD_REQUEST, "Decode Error"),
        Some(IndexerError::ObjectStoreError(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Object Store Error")
        }
        Some(IndexerError::NodeError(_)) => (StatusCode::BAD_GATEWAY, "Node Error"),
        None => (StatusCode::BAD_REQUEST, "Unknown Error Code"),
    };

    let error = serde_json::to_string(&ResponseError {
        code: code.as_u16(),
        message: message.to_string(),
    })
    .unwrap();

    Ok(http::Response::builder().status(code).body(error))
}
