use std::collections::BTreeSet;

use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use db::providers::provider::{
    apply_balance_delta, blocks_at_height, canonicalize_at, ensure_contract, insert_block,
    insert_events, insert_signers, insert_transaction, insert_transfers,
};
use db::types::{
    decode_envelope, decode_hash_number, flags_to_signed, parse_pact_amount, parse_seconds,
    BlockEnvelope, BlockHeader, Command, CommandOutput, PactEvent, PactPayload, Source,
};
use db::{NewBlock, NewContract, NewEvent, NewSigner, NewTransaction, NewTransfer};
use diesel_async::AsyncPgConnection;
use serde_json::Value;
use tracing::debug;

use crate::bus::DispatchInfo;
use crate::error::IndexerError;

/// Modules whose TRANSFER events move tokens rather than fungible amounts.
const NON_FUNGIBLE_MODULES: &[&str] = &[
    "marmalade.ledger",
    "marmalade-v2.ledger",
    "marmalade-ng.ledger",
];

pub const FUNGIBLE: &str = "fungible";
pub const NON_FUNGIBLE: &str = "non-fungible";

/// The single write path: decode one raw block and persist it with all of
/// its derived facts on the caller's transaction. Returns `None` when the
/// block hash was already indexed (idempotent success), in which case the
/// caller has nothing to publish.
pub async fn materialise(
    conn: &mut AsyncPgConnection,
    network: &str,
    source: Source,
    envelope: &BlockEnvelope,
) -> Result<Option<DispatchInfo>, IndexerError> {
    let decoded = decode_envelope(envelope)?;
    let header = &decoded.header;
    let creation_time = parse_seconds(&header.creation_time)?;

    let new_block = NewBlock {
        chain_id: header.chain_id,
        creation_time,
        epoch: parse_seconds(&header.epoch_start)?,
        flags: flags_to_signed(header.feature_flags),
        hash: header.hash.clone(),
        height: header.height,
        miner_data: decoded.miner_data.clone(),
        nonce: header.nonce.clone(),
        parent: header.parent.clone(),
        payload_hash: header.payload_hash.clone(),
        target: decode_hash_number(&header.target)?,
        weight: decode_hash_number(&header.weight)?,
        adjacents: serde_json::to_value(&header.adjacents)?,
        transactions_hash: envelope.payload_with_outputs.transactions_hash.clone(),
        outputs_hash: envelope.payload_with_outputs.outputs_hash.clone(),
        coinbase: serde_json::to_value(&decoded.coinbase)?,
        transactions_count: decoded.transactions.len() as i64,
    };

    let fork = !blocks_at_height(conn, header.chain_id, header.height)
        .await?
        .is_empty();

    let block_id = match insert_block(conn, &new_block).await? {
        Some(id) => id,
        None => {
            debug!(
                chain_id = header.chain_id,
                height = header.height,
                hash = %header.hash,
                source = %source,
                "block already indexed"
            );
            return Ok(None);
        }
    };

    let mut request_keys = Vec::with_capacity(decoded.transactions.len());
    let mut event_names = BTreeSet::new();

    for (command, output) in &decoded.transactions {
        insert_command(
            conn,
            network,
            block_id,
            header,
            creation_time,
            command,
            output,
            &mut event_names,
        )
        .await?;
        request_keys.push(output.req_key.clone());
    }

    insert_coinbase(
        conn,
        network,
        block_id,
        header,
        creation_time,
        &decoded.coinbase,
        &mut event_names,
    )
    .await?;

    if fork {
        canonicalize_at(conn, header.chain_id, header.height).await?;
    }

    Ok(Some(DispatchInfo {
        hash: header.hash.clone(),
        chain_id: header.chain_id,
        height: header.height,
        request_keys,
        qualified_event_names: event_names.into_iter().collect(),
    }))
}

async fn insert_command(
    conn: &mut AsyncPgConnection,
    network: &str,
    block_id: i64,
    header: &BlockHeader,
    block_time: DateTime<Utc>,
    signed: &db::SignedCommand,
    output: &CommandOutput,
    event_names: &mut BTreeSet<String>,
) -> Result<(), IndexerError> {
    let command: Command = serde_json::from_str(&signed.cmd)?;
    let meta = command.meta.clone().unwrap_or_else(|| db::CommandMeta {
        chain_id: None,
        sender: None,
        gas_limit: None,
        gas_price: None,
        ttl: None,
        creation_time: None,
    });
    let creation_time = meta
        .creation_time
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or(block_time);

    let mut row = NewTransaction {
        block_id,
        request_key: output.req_key.clone(),
        hash: signed.hash.clone(),
        chain_id: header.chain_id,
        creation_time,
        sender: meta.sender.clone().unwrap_or_default(),
        code: None,
        data: None,
        pact_id: None,
        step: None,
        rollback: None,
        proof: None,
        gas: output.gas,
        gas_limit: meta.gas_limit,
        gas_price: meta.gas_price,
        ttl: meta.ttl,
        nonce: command.nonce.clone(),
        metadata: output.meta_data.clone(),
        result: Some(output.result.clone()),
        logs: output.logs.clone(),
        num_events: output.events.len() as i64,
        txid: output.tx_id,
        canonical: true,
    };
    match command.payload.classify() {
        Some(PactPayload::Execution { code, data }) => {
            row.code = Some(code);
            row.data = Some(data);
        }
        Some(PactPayload::Continuation {
            pact_id,
            step,
            rollback,
            proof,
            data,
        }) => {
            row.pact_id = Some(pact_id);
            row.step = Some(step);
            row.rollback = Some(rollback);
            row.proof = proof;
            row.data = Some(data);
        }
        None => {}
    }

    let transaction_id = insert_transaction(conn, &row).await?;

    let signer_rows: Vec<NewSigner> = command
        .signers
        .iter()
        .enumerate()
        .map(|(idx, signer)| NewSigner {
            transaction_id,
            pubkey: signer.pub_key.clone(),
            address: signer.address.clone(),
            idx: Some(idx as i64),
            clist: signer.clist.clone(),
        })
        .collect();
    insert_signers(conn, &signer_rows).await?;

    insert_outputs(conn, network, transaction_id, header, output, event_names).await
}

async fn insert_coinbase(
    conn: &mut AsyncPgConnection,
    network: &str,
    block_id: i64,
    header: &BlockHeader,
    block_time: DateTime<Utc>,
    coinbase: &CommandOutput,
    event_names: &mut BTreeSet<String>,
) -> Result<(), IndexerError> {
    let row = NewTransaction {
        block_id,
        request_key: coinbase.req_key.clone(),
        hash: coinbase.req_key.clone(),
        chain_id: header.chain_id,
        creation_time: block_time,
        sender: "coinbase".to_string(),
        code: None,
        data: None,
        pact_id: None,
        step: None,
        rollback: None,
        proof: None,
        gas: coinbase.gas,
        gas_limit: None,
        gas_price: None,
        ttl: None,
        nonce: None,
        metadata: coinbase.meta_data.clone(),
        result: Some(coinbase.result.clone()),
        logs: coinbase.logs.clone(),
        num_events: coinbase.events.len() as i64,
        txid: coinbase.tx_id,
        canonical: true,
    };
    let transaction_id = insert_transaction(conn, &row).await?;
    insert_outputs(conn, network, transaction_id, header, coinbase, event_names).await
}

/// Events, derived transfers and balance movements for one command output.
async fn insert_outputs(
    conn: &mut AsyncPgConnection,
    network: &str,
    transaction_id: i64,
    header: &BlockHeader,
    output: &CommandOutput,
    event_names: &mut BTreeSet<String>,
) -> Result<(), IndexerError> {
    let mut event_rows = Vec::with_capacity(output.events.len());
    let mut drafts = Vec::new();

    for (idx, event) in output.events.iter().enumerate() {
        let qual_name = event.qual_name();
        event_names.insert(qual_name.clone());
        event_rows.push(NewEvent {
            transaction_id,
            request_key: output.req_key.clone(),
            chain_id: header.chain_id,
            idx: idx as i64,
            module: event.module.qualified(),
            name: event.name.clone(),
            qual_name,
            params: Value::Array(event.params.clone()),
            block: header.hash.clone(),
            height: header.height,
        });
        if let Some(draft) = derive_transfer(event) {
            drafts.push(draft);
        }
    }

    insert_events(conn, &event_rows).await?;

    let mut transfer_rows = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let contract_id = ensure_contract(
            conn,
            &NewContract {
                network: network.to_string(),
                module_name: draft.module_name.clone(),
                chain_id: header.chain_id,
                symbol: None,
                decimals: None,
                contract_type: Some(draft.transfer_type.to_string()),
            },
        )
        .await?;

        let token = draft.token_id.clone().unwrap_or_default();
        for (account, delta) in balance_deltas(&draft) {
            apply_balance_delta(
                conn,
                &account,
                header.chain_id,
                &draft.module_name,
                &token,
                &delta,
            )
            .await?;
        }

        transfer_rows.push(NewTransfer {
            transaction_id,
            contract_id: Some(contract_id),
            amount: draft.amount,
            from_acct: draft.from_acct,
            to_acct: draft.to_acct,
            chain_id: header.chain_id,
            module_hash: draft.module_hash,
            module_name: draft.module_name,
            request_key: output.req_key.clone(),
            payload_hash: header.payload_hash.clone(),
            transfer_type: draft.transfer_type.to_string(),
            has_token_id: draft.token_id.is_some(),
            token_id: draft.token_id,
            network: network.to_string(),
            canonical: true,
        });
    }

    insert_transfers(conn, &transfer_rows).await?;
    Ok(())
}

#[derive(Clone, Debug)]
pub(crate) struct TransferDraft {
    pub from_acct: String,
    pub to_acct: String,
    pub amount: BigDecimal,
    pub module_name: String,
    pub module_hash: String,
    pub token_id: Option<String>,
    pub transfer_type: &'static str,
}

/// `M.TRANSFER` with `[from, to, amount]`, or the token variant
/// `[from, to, amount, tokenId]`, yields one transfer. Anything else is just
/// an event.
pub(crate) fn derive_transfer(event: &PactEvent) -> Option<TransferDraft> {
    if event.name != "TRANSFER" || event.params.len() < 3 {
        return None;
    }
    let from_acct = event.params[0].as_str()?.to_string();
    let to_acct = event.params[1].as_str()?.to_string();
    let amount = parse_pact_amount(&event.params[2])?;
    let token_id = event.params.get(3).map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    let module_name = event.module.qualified();
    let transfer_type = if NON_FUNGIBLE_MODULES.contains(&module_name.as_str()) {
        NON_FUNGIBLE
    } else {
        FUNGIBLE
    };
    Some(TransferDraft {
        from_acct,
        to_acct,
        amount,
        module_name,
        module_hash: event.module_hash.clone().unwrap_or_default(),
        token_id,
        transfer_type,
    })
}

/// Debit/credit pairs for one transfer. A missing side (coinbase mint, burn)
/// moves only the other one.
pub(crate) fn balance_deltas(draft: &TransferDraft) -> Vec<(String, BigDecimal)> {
    let mut deltas = Vec::with_capacity(2);
    if !draft.from_acct.is_empty() {
        deltas.push((draft.from_acct.clone(), -draft.amount.clone()));
    }
    if !draft.to_acct.is_empty() {
        deltas.push((draft.to_acct.clone(), draft.amount.clone()));
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::types::ModuleRef;
    use serde_json::json;
    use std::str::FromStr;

    fn transfer_event(module: &str, params: Vec<Value>) -> PactEvent {
        PactEvent {
            name: "TRANSFER".to_string(),
            module: ModuleRef {
                namespace: None,
                name: module.to_string(),
            },
            module_hash: Some("mh".to_string()),
            params,
        }
    }

    #[test]
    fn fungible_transfer_derives_with_both_sides() {
        let event = transfer_event("coin", vec![json!("alice"), json!("bob"), json!(2.5)]);
        let draft = derive_transfer(&event).unwrap();
        assert_eq!(draft.from_acct, "alice");
        assert_eq!(draft.to_acct, "bob");
        assert_eq!(draft.amount, BigDecimal::from_str("2.5").unwrap());
        assert_eq!(draft.transfer_type, FUNGIBLE);
        assert!(draft.token_id.is_none());
    }

    #[test]
    fn token_transfer_variant_carries_token_id() {
        let event = transfer_event(
            "marmalade-v2.ledger",
            vec![json!("alice"), json!("bob"), json!(1), json!("t:abc")],
        );
        let draft = derive_transfer(&event).unwrap();
        assert_eq!(draft.transfer_type, NON_FUNGIBLE);
        assert_eq!(draft.token_id.as_deref(), Some("t:abc"));
    }

    #[test]
    fn non_transfer_events_derive_nothing() {
        let event = PactEvent {
            name: "SALE".to_string(),
            module: ModuleRef {
                namespace: None,
                name: "marmalade".to_string(),
            },
            module_hash: None,
            params: vec![json!("a"), json!("b"), json!(1)],
        };
        assert!(derive_transfer(&event).is_none());

        let short = transfer_event("coin", vec![json!("a"), json!("b")]);
        assert!(derive_transfer(&short).is_none());
    }

    #[test]
    fn decimal_object_amounts_parse() {
        let event = transfer_event(
            "coin",
            vec![json!("a"), json!("b"), json!({"decimal": "12.000000000001"})],
        );
        let draft = derive_transfer(&event).unwrap();
        assert_eq!(
            draft.amount,
            BigDecimal::from_str("12.000000000001").unwrap()
        );
    }

    #[test]
    fn balance_deltas_sum_to_zero_for_two_sided_transfers() {
        let event = transfer_event("coin", vec![json!("alice"), json!("bob"), json!(7)]);
        let draft = derive_transfer(&event).unwrap();
        let deltas = balance_deltas(&draft);
        assert_eq!(deltas.len(), 2);
        let sum: BigDecimal = deltas.iter().map(|(_, d)| d.clone()).sum();
        assert_eq!(sum, BigDecimal::from(0));
    }

    #[test]
    fn coinbase_mint_credits_only_the_miner() {
        let event = transfer_event("coin", vec![json!(""), json!("miner"), json!(1)]);
        let draft = derive_transfer(&event).unwrap();
        let deltas = balance_deltas(&draft);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].0, "miner");
        assert_eq!(deltas[0].1, BigDecimal::from(1));
    }
}
