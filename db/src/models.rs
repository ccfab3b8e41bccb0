use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(
    Clone, Debug, Queryable, Selectable, Identifiable, QueryableByName, Serialize, Deserialize,
)]
#[diesel(table_name = crate::schema::blocks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BlockModel {
    pub id: i64,
    pub chain_id: i64,
    pub creation_time: DateTime<Utc>,
    pub epoch: DateTime<Utc>,
    pub flags: i64,
    pub hash: String,
    pub height: i64,
    pub miner_data: Value,
    pub nonce: String,
    pub parent: String,
    pub payload_hash: String,
    pub target: BigDecimal,
    pub weight: BigDecimal,
    pub adjacents: Value,
    pub transactions_hash: String,
    pub outputs_hash: String,
    pub coinbase: Value,
    pub transactions_count: i64,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::blocks)]
pub struct NewBlock {
    pub chain_id: i64,
    pub creation_time: DateTime<Utc>,
    pub epoch: DateTime<Utc>,
    pub flags: i64,
    pub hash: String,
    pub height: i64,
    pub miner_data: Value,
    pub nonce: String,
    pub parent: String,
    pub payload_hash: String,
    pub target: BigDecimal,
    pub weight: BigDecimal,
    pub adjacents: Value,
    pub transactions_hash: String,
    pub outputs_hash: String,
    pub coinbase: Value,
    pub transactions_count: i64,
}

#[derive(
    Clone, Debug, Queryable, Selectable, Identifiable, Associations, Serialize, Deserialize,
)]
#[diesel(belongs_to(BlockModel, foreign_key = block_id))]
#[diesel(table_name = crate::schema::transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TransactionModel {
    pub id: i64,
    pub block_id: i64,
    pub request_key: String,
    pub hash: String,
    pub chain_id: i64,
    pub creation_time: DateTime<Utc>,
    pub sender: String,
    pub code: Option<String>,
    pub data: Option<Value>,
    pub pact_id: Option<String>,
    pub step: Option<i64>,
    pub rollback: Option<bool>,
    pub proof: Option<String>,
    pub gas: i64,
    pub gas_limit: Option<i64>,
    pub gas_price: Option<f64>,
    pub ttl: Option<i64>,
    pub nonce: Option<String>,
    pub metadata: Option<Value>,
    pub result: Option<Value>,
    pub logs: Option<String>,
    pub num_events: i64,
    pub txid: Option<i64>,
    pub canonical: bool,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::transactions)]
pub struct NewTransaction {
    pub block_id: i64,
    pub request_key: String,
    pub hash: String,
    pub chain_id: i64,
    pub creation_time: DateTime<Utc>,
    pub sender: String,
    pub code: Option<String>,
    pub data: Option<Value>,
    pub pact_id: Option<String>,
    pub step: Option<i64>,
    pub rollback: Option<bool>,
    pub proof: Option<String>,
    pub gas: i64,
    pub gas_limit: Option<i64>,
    pub gas_price: Option<f64>,
    pub ttl: Option<i64>,
    pub nonce: Option<String>,
    pub metadata: Option<Value>,
    pub result: Option<Value>,
    pub logs: Option<String>,
    pub num_events: i64,
    pub txid: Option<i64>,
    pub canonical: bool,
}

#[derive(
    Clone, Debug, Queryable, Selectable, Identifiable, Associations, Serialize, Deserialize,
)]
#[diesel(belongs_to(TransactionModel, foreign_key = transaction_id))]
#[diesel(table_name = crate::schema::events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EventModel {
    pub id: i64,
    pub transaction_id: i64,
    pub request_key: String,
    pub chain_id: i64,
    pub idx: i64,
    pub module: String,
    pub name: String,
    pub qual_name: String,
    pub params: Value,
    pub block: String,
    pub height: i64,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::events)]
pub struct NewEvent {
    pub transaction_id: i64,
    pub request_key: String,
    pub chain_id: i64,
    pub idx: i64,
    pub module: String,
    pub name: String,
    pub qual_name: String,
    pub params: Value,
    pub block: String,
    pub height: i64,
}

#[derive(Clone, Debug, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::contracts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ContractModel {
    pub id: i64,
    pub network: String,
    pub module_name: String,
    pub chain_id: i64,
    pub symbol: Option<String>,
    pub decimals: Option<i32>,
    pub contract_type: Option<String>,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::contracts)]
pub struct NewContract {
    pub network: String,
    pub module_name: String,
    pub chain_id: i64,
    pub symbol: Option<String>,
    pub decimals: Option<i32>,
    pub contract_type: Option<String>,
}

#[derive(
    Clone, Debug, Queryable, Selectable, Identifiable, Associations, Serialize, Deserialize,
)]
#[diesel(belongs_to(TransactionModel, foreign_key = transaction_id))]
#[diesel(table_name = crate::schema::transfers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TransferModel {
    pub id: i64,
    pub transaction_id: i64,
    pub contract_id: Option<i64>,
    pub amount: BigDecimal,
    pub from_acct: String,
    pub to_acct: String,
    pub chain_id: i64,
    pub module_hash: String,
    pub module_name: String,
    pub request_key: String,
    pub payload_hash: String,
    pub transfer_type: String,
    pub has_token_id: bool,
    pub token_id: Option<String>,
    pub network: String,
    pub canonical: bool,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::transfers)]
pub struct NewTransfer {
    pub transaction_id: i64,
    pub contract_id: Option<i64>,
    pub amount: BigDecimal,
    pub from_acct: String,
    pub to_acct: String,
    pub chain_id: i64,
    pub module_hash: String,
    pub module_name: String,
    pub request_key: String,
    pub payload_hash: String,
    pub transfer_type: String,
    pub has_token_id: bool,
    pub token_id: Option<String>,
    pub network: String,
    pub canonical: bool,
}

#[derive(
    Clone, Debug, Queryable, Selectable, Identifiable, Associations, Serialize, Deserialize,
)]
#[diesel(belongs_to(TransactionModel, foreign_key = transaction_id))]
#[diesel(table_name = crate::schema::signers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SignerModel {
    pub id: i64,
    pub transaction_id: i64,
    pub pubkey: String,
    pub address: Option<String>,
    pub idx: Option<i64>,
    pub clist: Value,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::signers)]
pub struct NewSigner {
    pub transaction_id: i64,
    pub pubkey: String,
    pub address: Option<String>,
    pub idx: Option<i64>,
    pub clist: Value,
}

#[derive(Clone, Debug, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::balances)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BalanceModel {
    pub id: i64,
    pub account: String,
    pub chain_id: i64,
    pub module: String,
    pub token_id: String,
    pub balance: BigDecimal,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::balances)]
pub struct NewBalance {
    pub account: String,
    pub chain_id: i64,
    pub module: String,
    pub token_id: String,
    pub balance: BigDecimal,
}

#[derive(Clone, Debug, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::guards)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GuardModel {
    pub id: i64,
    pub account: String,
    pub chain_id: i64,
    pub module: String,
    pub keys: Value,
    pub predicate: String,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::guards)]
pub struct NewGuard {
    pub account: String,
    pub chain_id: i64,
    pub module: String,
    pub keys: Value,
    pub predicate: String,
}

#[derive(Clone, Debug, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::sync_status)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SyncStatusModel {
    pub id: i64,
    pub network: String,
    pub chain_id: i64,
    pub prefix: String,
    pub source: String,
    pub key: Option<String>,
    pub from_height: Option<i64>,
    pub to_height: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::sync_status)]
pub struct NewSyncStatus {
    pub network: String,
    pub chain_id: i64,
    pub prefix: String,
    pub source: String,
    pub key: Option<String>,
    pub from_height: Option<i64>,
    pub to_height: Option<i64>,
}

#[derive(Clone, Debug, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::sync_errors)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SyncErrorModel {
    pub id: i64,
    pub network: String,
    pub chain_id: i64,
    pub from_height: i64,
    pub to_height: i64,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::sync_errors)]
pub struct NewSyncError {
    pub network: String,
    pub chain_id: i64,
    pub from_height: i64,
    pub to_height: i64,
    pub source: String,
}

#[derive(Clone, Debug, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::streaming_errors)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StreamingErrorModel {
    pub id: i64,
    pub hash: String,
    pub chain_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::streaming_errors)]
pub struct NewStreamingError {
    pub hash: String,
    pub chain_id: i64,
}
