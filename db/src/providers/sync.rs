use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::*;
use crate::providers::provider::DbError;
use crate::schema::{streaming_errors, sync_errors, sync_status};
use crate::types::Source;

pub async fn find_last_cursor(
    conn: &mut AsyncPgConnection,
    network: &str,
    chain_id: i64,
    prefix: &str,
    source: Source,
) -> Result<Option<SyncStatusModel>, DbError> {
    Ok(sync_status::table
        .filter(sync_status::network.eq(network))
        .filter(sync_status::chain_id.eq(chain_id))
        .filter(sync_status::prefix.eq(prefix))
        .filter(sync_status::source.eq(source.to_string()))
        .select(SyncStatusModel::as_select())
        .first(conn)
        .await
        .optional()?)
}

/// Upsert the cursor row for one `(network, chain, prefix, source)`
/// identity. Callers run this on the transaction that persisted the work the
/// cursor describes, so a rollback reverts the advance too.
pub async fn save_cursor(
    conn: &mut AsyncPgConnection,
    cursor: &NewSyncStatus,
) -> Result<(), DbError> {
    diesel::insert_into(sync_status::table)
        .values(cursor)
        .on_conflict((
            sync_status::network,
            sync_status::chain_id,
            sync_status::prefix,
            sync_status::source,
        ))
        .do_update()
        .set((
            sync_status::key.eq(cursor.key.clone()),
            sync_status::from_height.eq(cursor.from_height),
            sync_status::to_height.eq(cursor.to_height),
            sync_status::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Highest `to_height` cursor per chain across the given sources.
pub async fn last_sync_for_all_chains(
    conn: &mut AsyncPgConnection,
    network: &str,
    sources: &[Source],
) -> Result<Vec<SyncStatusModel>, DbError> {
    let names: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
    let rows = sync_status::table
        .filter(sync_status::network.eq(network))
        .filter(sync_status::source.eq_any(&names))
        .filter(sync_status::to_height.is_not_null())
        .order((sync_status::chain_id.asc(), sync_status::to_height.desc()))
        .select(SyncStatusModel::as_select())
        .load(conn)
        .await?;

    let mut best: Vec<SyncStatusModel> = Vec::new();
    for row in rows {
        if best.last().map(|b| b.chain_id) != Some(row.chain_id) {
            best.push(row);
        }
    }
    Ok(best)
}

pub async fn save_sync_error(
    conn: &mut AsyncPgConnection,
    error: &NewSyncError,
) -> Result<i64, DbError> {
    let id = diesel::insert_into(sync_errors::table)
        .values(error)
        .returning(sync_errors::id)
        .get_result::<i64>(conn)
        .await?;
    Ok(id)
}

pub async fn list_sync_errors(
    conn: &mut AsyncPgConnection,
    network: &str,
) -> Result<Vec<SyncErrorModel>, DbError> {
    Ok(sync_errors::table
        .filter(sync_errors::network.eq(network))
        .order(sync_errors::id.asc())
        .select(SyncErrorModel::as_select())
        .load(conn)
        .await?)
}

pub async fn delete_sync_error(conn: &mut AsyncPgConnection, id: i64) -> Result<(), DbError> {
    diesel::delete(sync_errors::table.filter(sync_errors::id.eq(id)))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn save_streaming_error(
    conn: &mut AsyncPgConnection,
    error: &NewStreamingError,
) -> Result<(), DbError> {
    diesel::insert_into(streaming_errors::table)
        .values(error)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn list_streaming_errors(
    conn: &mut AsyncPgConnection,
) -> Result<Vec<StreamingErrorModel>, DbError> {
    Ok(streaming_errors::table
        .order(streaming_errors::id.asc())
        .select(StreamingErrorModel::as_select())
        .load(conn)
        .await?)
}

/// Drop the streaming-error marker once the block is back in the store.
pub async fn delete_streaming_error(
    conn: &mut AsyncPgConnection,
    hash: &str,
    chain_id: i64,
) -> Result<(), DbError> {
    diesel::delete(
        streaming_errors::table
            .filter(streaming_errors::hash.eq(hash))
            .filter(streaming_errors::chain_id.eq(chain_id)),
    )
    .execute(conn)
    .await?;
    Ok(())
}
