use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sql_types::BigInt;
use diesel::upsert::excluded;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use thiserror::Error;

use crate::models::*;
use crate::schema::{balances, blocks, contracts, events, guards, signers, transactions, transfers};
use crate::types::HeightRange;
use crate::DatabaseConnections;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Diesel Error: {0}")]
    Diesel(#[from] DieselError),

    #[error("Pool Error: {0}")]
    Pool(#[from] diesel_async::pooled_connection::deadpool::PoolError),
}

/// Shared handle on the relational store. In-transaction writes are the free
/// functions below; the struct wraps the pool for callers that only need a
/// single round-trip.
#[derive(Clone)]
pub struct InternalDataProvider {
    pub dbc: DatabaseConnections,
}

impl InternalDataProvider {
    pub async fn new() -> Result<Self, std::io::Error> {
        Ok(InternalDataProvider {
            dbc: DatabaseConnections::init().await?,
        })
    }

    pub async fn conn(
        &self,
    ) -> Result<
        diesel_async::pooled_connection::deadpool::Object<AsyncPgConnection>,
        DbError,
    > {
        Ok(self.dbc.postgres.get().await?)
    }

    pub async fn next_missing_ranges(
        &self,
        chain_id: i64,
        min_height: i64,
        below: i64,
        limit: i64,
    ) -> Result<Vec<HeightRange>, DbError> {
        let mut conn = self.conn().await?;
        next_missing_ranges(&mut conn, chain_id, min_height, below, limit).await
    }
}

/// Insert a block, treating a duplicate `hash` as idempotent success.
/// Returns the fresh row id, or `None` when the block was already indexed.
pub async fn insert_block(
    conn: &mut AsyncPgConnection,
    block: &NewBlock,
) -> Result<Option<i64>, DbError> {
    let id = diesel::insert_into(blocks::table)
        .values(block)
        .on_conflict(blocks::hash)
        .do_nothing()
        .returning(blocks::id)
        .get_result::<i64>(conn)
        .await
        .optional()?;
    Ok(id)
}

pub async fn insert_transaction(
    conn: &mut AsyncPgConnection,
    transaction: &NewTransaction,
) -> Result<i64, DbError> {
    let id = diesel::insert_into(transactions::table)
        .values(transaction)
        .returning(transactions::id)
        .get_result::<i64>(conn)
        .await?;
    Ok(id)
}

pub async fn insert_events(
    conn: &mut AsyncPgConnection,
    rows: &[NewEvent],
) -> Result<usize, DbError> {
    if rows.is_empty() {
        return Ok(0);
    }
    Ok(diesel::insert_into(events::table)
        .values(rows)
        .execute(conn)
        .await?)
}

pub async fn insert_signers(
    conn: &mut AsyncPgConnection,
    rows: &[NewSigner],
) -> Result<usize, DbError> {
    if rows.is_empty() {
        return Ok(0);
    }
    Ok(diesel::insert_into(signers::table)
        .values(rows)
        .execute(conn)
        .await?)
}

pub async fn insert_transfers(
    conn: &mut AsyncPgConnection,
    rows: &[NewTransfer],
) -> Result<usize, DbError> {
    if rows.is_empty() {
        return Ok(0);
    }
    Ok(diesel::insert_into(transfers::table)
        .values(rows)
        .execute(conn)
        .await?)
}

/// Apply one side of a transfer to the balance ledger, creating the row on
/// first observation.
pub async fn apply_balance_delta(
    conn: &mut AsyncPgConnection,
    account: &str,
    chain_id: i64,
    module: &str,
    token_id: &str,
    delta: &BigDecimal,
) -> Result<(), DbError> {
    let row = NewBalance {
        account: account.to_string(),
        chain_id,
        module: module.to_string(),
        token_id: token_id.to_string(),
        balance: delta.clone(),
    };
    diesel::insert_into(balances::table)
        .values(&row)
        .on_conflict((
            balances::account,
            balances::chain_id,
            balances::module,
            balances::token_id,
        ))
        .do_update()
        .set(balances::balance.eq(balances::balance + excluded(balances::balance)))
        .execute(conn)
        .await?;
    Ok(())
}

/// Look up or create the contract row for a transferred module.
pub async fn ensure_contract(
    conn: &mut AsyncPgConnection,
    contract: &NewContract,
) -> Result<i64, DbError> {
    let inserted = diesel::insert_into(contracts::table)
        .values(contract)
        .on_conflict((
            contracts::network,
            contracts::module_name,
            contracts::chain_id,
        ))
        .do_nothing()
        .returning(contracts::id)
        .get_result::<i64>(conn)
        .await
        .optional()?;
    if let Some(id) = inserted {
        return Ok(id);
    }
    let id = contracts::table
        .filter(contracts::network.eq(&contract.network))
        .filter(contracts::module_name.eq(&contract.module_name))
        .filter(contracts::chain_id.eq(contract.chain_id))
        .select(contracts::id)
        .first::<i64>(conn)
        .await?;
    Ok(id)
}

pub async fn blocks_at_height(
    conn: &mut AsyncPgConnection,
    chain_id: i64,
    height: i64,
) -> Result<Vec<BlockModel>, DbError> {
    Ok(blocks::table
        .filter(blocks::chain_id.eq(chain_id))
        .filter(blocks::height.eq(height))
        .select(BlockModel::as_select())
        .order((blocks::weight.desc(), blocks::hash.asc()))
        .load(conn)
        .await?)
}

pub async fn children_of(
    conn: &mut AsyncPgConnection,
    chain_id: i64,
    parent_hash: &str,
) -> Result<Vec<BlockModel>, DbError> {
    Ok(blocks::table
        .filter(blocks::chain_id.eq(chain_id))
        .filter(blocks::parent.eq(parent_hash))
        .select(BlockModel::as_select())
        .load(conn)
        .await?)
}

/// Flip the derived `canonical` flag for everything belonging to one block.
pub async fn set_canonical(
    conn: &mut AsyncPgConnection,
    block_id: i64,
    canonical: bool,
) -> Result<(), DbError> {
    diesel::update(transactions::table.filter(transactions::block_id.eq(block_id)))
        .set(transactions::canonical.eq(canonical))
        .execute(conn)
        .await?;
    let tx_ids = transactions::table
        .filter(transactions::block_id.eq(block_id))
        .select(transactions::id);
    diesel::update(transfers::table.filter(transfers::transaction_id.eq_any(tx_ids)))
        .set(transfers::canonical.eq(canonical))
        .execute(conn)
        .await?;
    Ok(())
}

/// Re-derive canonicality after a fork at `(chain_id, height)`. The heaviest
/// block wins, ties by lexicographic hash; flags propagate forward along
/// parent links on both branches.
pub async fn canonicalize_at(
    conn: &mut AsyncPgConnection,
    chain_id: i64,
    height: i64,
) -> Result<(), DbError> {
    let candidates = blocks_at_height(conn, chain_id, height).await?;
    if candidates.len() < 2 {
        return Ok(());
    }
    let winner_id = candidates[0].id;
    for candidate in candidates {
        let canonical = candidate.id == winner_id;
        let mut frontier = vec![(candidate.id, candidate.hash)];
        while let Some((block_id, hash)) = frontier.pop() {
            set_canonical(conn, block_id, canonical).await?;
            for child in children_of(conn, chain_id, &hash).await? {
                frontier.push((child.id, child.hash));
            }
        }
    }
    Ok(())
}

pub async fn max_indexed_height(
    conn: &mut AsyncPgConnection,
    chain_id: i64,
) -> Result<Option<i64>, DbError> {
    Ok(blocks::table
        .filter(blocks::chain_id.eq(chain_id))
        .select(diesel::dsl::max(blocks::height))
        .first::<Option<i64>>(conn)
        .await?)
}

pub async fn min_indexed_height(
    conn: &mut AsyncPgConnection,
    chain_id: i64,
) -> Result<Option<i64>, DbError> {
    Ok(blocks::table
        .filter(blocks::chain_id.eq(chain_id))
        .select(diesel::dsl::min(blocks::height))
        .first::<Option<i64>>(conn)
        .await?)
}

#[derive(QueryableByName)]
struct GapRow {
    #[diesel(sql_type = BigInt)]
    from_height: i64,
    #[diesel(sql_type = BigInt)]
    to_height: i64,
}

/// Lowest-first contiguous unindexed ranges for one chain inside
/// `[min_height, below)`. Interior holes come from a window scan over the
/// distinct indexed heights; the leading and trailing gaps are stitched on
/// around it.
pub async fn next_missing_ranges(
    conn: &mut AsyncPgConnection,
    chain_id: i64,
    min_height: i64,
    below: i64,
    limit: i64,
) -> Result<Vec<HeightRange>, DbError> {
    if min_height >= below {
        return Ok(Vec::new());
    }

    let lowest = min_indexed_height(conn, chain_id).await?;
    let highest = max_indexed_height(conn, chain_id).await?;

    let (lowest, highest) = match (lowest, highest) {
        (Some(lo), Some(hi)) => (lo, hi),
        _ => {
            return Ok(vec![HeightRange {
                from_height: min_height,
                to_height: below - 1,
            }]);
        }
    };

    let mut ranges = Vec::new();
    if lowest > min_height {
        ranges.push(HeightRange {
            from_height: min_height,
            to_height: lowest - 1,
        });
    }

    let interior = diesel::sql_query(
        "SELECT h + 1 AS from_height, next_h - 1 AS to_height \
         FROM ( \
             SELECT height AS h, LEAD(height) OVER (ORDER BY height) AS next_h \
             FROM (SELECT DISTINCT height FROM blocks \
                   WHERE chain_id = $1 AND height >= $2 AND height < $3) heights \
         ) gaps \
         WHERE next_h > h + 1 \
         ORDER BY from_height \
         LIMIT $4",
    )
    .bind::<BigInt, _>(chain_id)
    .bind::<BigInt, _>(min_height)
    .bind::<BigInt, _>(below)
    .bind::<BigInt, _>(limit)
    .load::<GapRow>(conn)
    .await?;

    ranges.extend(interior.into_iter().map(|row| HeightRange {
        from_height: row.from_height,
        to_height: row.to_height,
    }));

    if highest < below - 1 {
        ranges.push(HeightRange {
            from_height: highest + 1,
            to_height: below - 1,
        });
    }

    ranges.truncate(limit as usize);
    Ok(ranges)
}

pub async fn truncate_guards(conn: &mut AsyncPgConnection) -> Result<(), DbError> {
    diesel::delete(guards::table).execute(conn).await?;
    Ok(())
}

pub async fn insert_guards(
    conn: &mut AsyncPgConnection,
    rows: &[NewGuard],
) -> Result<usize, DbError> {
    if rows.is_empty() {
        return Ok(0);
    }
    Ok(diesel::insert_into(guards::table)
        .values(rows)
        .on_conflict((guards::account, guards::chain_id, guards::module))
        .do_nothing()
        .execute(conn)
        .await?)
}

/// Id-ascending page over the balance ledger, used by the guards sweep.
pub async fn balances_after(
    conn: &mut AsyncPgConnection,
    after_id: i64,
    limit: i64,
) -> Result<Vec<BalanceModel>, DbError> {
    Ok(balances::table
        .filter(balances::id.gt(after_id))
        .order(balances::id.asc())
        .limit(limit)
        .select(BalanceModel::as_select())
        .load(conn)
        .await?)
}
