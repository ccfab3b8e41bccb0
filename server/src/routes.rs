use db::provider::InternalDataProvider;
use db::providers::sync::{last_sync_for_all_chains, list_streaming_errors, list_sync_errors};
use db::types::Source;
use serde::Deserialize;
use std::{convert::Infallible, sync::Arc};
use warp::{self, http, Filter};

use crate::error::IndexerError;

#[derive(Deserialize)]
pub(crate) struct ChainIdQuery {
    pub chain_id: Option<i64>,
}

pub(crate) fn index_route(
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    async fn index_page_handler() -> Result<impl warp::Reply, Infallible> {
        let body = "Chainweb Indexer.".to_string();
        Ok(http::Response::builder().body(body))
    }

    warp::path::end()
        .and(warp::get())
        .and_then(index_page_handler)
}

/// Highest committed cursor per chain, across every ingestion source.
pub(crate) fn sync_status(
    provider: Arc<InternalDataProvider>,
    network: String,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    pub async fn get_sync_status(
        provider: Arc<InternalDataProvider>,
        network: String,
        query: ChainIdQuery,
    ) -> Result<impl warp::Reply, warp::Rejection> {
        let mut conn = provider
            .conn()
            .await
            .map_err(|e| warp::reject::custom(IndexerError::DbError(e)))?;
        let rows = last_sync_for_all_chains(
            &mut conn,
            &network,
            &[Source::Archive, Source::Api, Source::Streaming],
        )
        .await
        .map_err(|e| warp::reject::custom(IndexerError::DbError(e)))?;

        let rows = match query.chain_id {
            Some(chain_id) => rows
                .into_iter()
                .filter(|row| row.chain_id == chain_id)
                .collect(),
            None => rows,
        };
        Ok(warp::reply::json(&rows))
    }

    let sync_status_route = |provider: Arc<InternalDataProvider>, network: String| {
        warp::path!("sync" / "status")
            .and(warp::get())
            .and(warp::query::<ChainIdQuery>())
            .and_then(move |query| {
                get_sync_status(Arc::clone(&provider), network.clone(), query)
            })
    };

    sync_status_route(provider, network)
}

/// Outstanding ingestion failures, for operator visibility.
pub(crate) fn sync_errors(
    provider: Arc<InternalDataProvider>,
    network: String,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    pub async fn get_sync_errors(
        provider: Arc<InternalDataProvider>,
        network: String,
    ) -> Result<impl warp::Reply, warp::Rejection> {
        let mut conn = provider
            .conn()
            .await
            .map_err(|e| warp::reject::custom(IndexerError::DbError(e)))?;
        let api = list_sync_errors(&mut conn, &network)
            .await
            .map_err(|e| warp::reject::custom(IndexerError::DbError(e)))?;
        let streaming = list_streaming_errors(&mut conn)
            .await
            .map_err(|e| warp::reject::custom(IndexerError::DbError(e)))?;

        Ok(warp::reply::json(&serde_json::json!({
            "api": api,
            "streaming": streaming,
        })))
    }

    let sync_errors_route = |provider: Arc<InternalDataProvider>, network: String| {
        warp::path!("sync" / "errors")
            .and(warp::get())
            .and_then(move || get_sync_errors(Arc::clone(&provider), network.clone()))
    };

    sync_errors_route(provider, network)
}
