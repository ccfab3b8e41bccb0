use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Which pipeline produced a unit of indexed work. Stored verbatim in the
/// `sync_status` and `sync_errors` tables.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Source {
    Archive,
    Api,
    Backfill,
    Streaming,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::Archive => "archive",
            Source::Api => "api",
            Source::Backfill => "backfill",
            Source::Streaming => "streaming",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Source {
    type Err = DecodeError;

    fn from_str(input: &str) -> Result<Source, Self::Err> {
        match input {
            "archive" => Ok(Source::Archive),
            "api" => Ok(Source::Api),
            "backfill" => Ok(Source::Backfill),
            "streaming" => Ok(Source::Streaming),
            other => Err(DecodeError::Field(format!("unknown source {}", other))),
        }
    }
}

/// A contiguous, inclusive range of block heights.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HeightRange {
    pub from_height: i64,
    pub to_height: i64,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid timestamp: {0}")]
    Time(String),

    #[error("invalid field: {0}")]
    Field(String),
}

/// Block header as delivered by the node and the archive listing. Time fields
/// stay decimal strings until `parse_seconds` consumes them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub chain_id: i64,
    pub height: i64,
    pub hash: String,
    pub parent: String,
    pub creation_time: String,
    pub epoch_start: String,
    pub feature_flags: u64,
    pub nonce: String,
    pub payload_hash: String,
    pub target: String,
    pub weight: String,
    #[serde(default)]
    pub adjacents: BTreeMap<String, String>,
}

/// Raw payload-with-outputs: miner data, coinbase and both halves of every
/// transaction are base64 envelopes around UTF-8 JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadWithOutputs {
    pub miner_data: String,
    pub coinbase: String,
    pub payload_hash: String,
    pub transactions_hash: String,
    pub outputs_hash: String,
    #[serde(default)]
    pub transactions: Vec<(String, String)>,
}

/// The `{header, payloadWithOutputs}` envelope shared by the object store
/// and the block-update stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEnvelope {
    pub header: BlockHeader,
    pub payload_with_outputs: PayloadWithOutputs,
}

/// A signed command as it appears inside a payload: `cmd` is a JSON string
/// that still needs a second parse.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedCommand {
    pub hash: String,
    pub cmd: String,
    #[serde(default)]
    pub sigs: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(default)]
    pub network_id: Option<String>,
    pub payload: CommandPayload,
    #[serde(default)]
    pub signers: Vec<CommandSigner>,
    #[serde(default)]
    pub meta: Option<CommandMeta>,
    #[serde(default)]
    pub nonce: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(default)]
    pub exec: Option<ExecPayload>,
    #[serde(default)]
    pub cont: Option<ContPayload>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecPayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContPayload {
    pub pact_id: String,
    pub step: i64,
    #[serde(default)]
    pub rollback: bool,
    #[serde(default)]
    pub proof: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Variant view over a command payload. Execution wins whenever `code` is
/// present, continuation otherwise.
#[derive(Clone, Debug)]
pub enum PactPayload {
    Execution {
        code: String,
        data: Value,
    },
    Continuation {
        pact_id: String,
        step: i64,
        rollback: bool,
        proof: Option<String>,
        data: Value,
    },
}

impl CommandPayload {
    pub fn classify(&self) -> Option<PactPayload> {
        if let Some(exec) = &self.exec {
            if let Some(code) = &exec.code {
                return Some(PactPayload::Execution {
                    code: code.clone(),
                    data: exec.data.clone(),
                });
            }
        }
        self.cont.as_ref().map(|cont| PactPayload::Continuation {
            pact_id: cont.pact_id.clone(),
            step: cont.step,
            rollback: cont.rollback,
            proof: cont.proof.clone(),
            data: cont.data.clone(),
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSigner {
    pub pub_key: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub clist: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMeta {
    #[serde(default)]
    pub chain_id: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<i64>,
    #[serde(default)]
    pub gas_price: Option<f64>,
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub creation_time: Option<i64>,
}

/// Command output half of a payload transaction; also the shape of the
/// decoded coinbase.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    #[serde(default)]
    pub gas: i64,
    pub req_key: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub events: Vec<PactEvent>,
    #[serde(default)]
    pub tx_id: Option<i64>,
    #[serde(default)]
    pub continuation: Option<Value>,
    #[serde(default)]
    pub meta_data: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PactEvent {
    pub name: String,
    pub module: ModuleRef,
    #[serde(default)]
    pub module_hash: Option<String>,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleRef {
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

impl ModuleRef {
    pub fn qualified(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{}.{}", ns, self.name),
            _ => self.name.clone(),
        }
    }
}

impl PactEvent {
    /// `module.name`, the qualified event name used for subscriptions.
    pub fn qual_name(&self) -> String {
        format!("{}.{}", self.module.qualified(), self.name)
    }
}

/// A fully decoded block: header plus the payload components with every
/// base64 envelope unwrapped.
#[derive(Clone, Debug)]
pub struct DecodedBlock {
    pub header: BlockHeader,
    pub miner_data: Value,
    pub coinbase: CommandOutput,
    pub transactions: Vec<(SignedCommand, CommandOutput)>,
}

pub fn decode_base64_json(input: &str) -> Result<Value, DecodeError> {
    let bytes = STANDARD.decode(input)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn decode_base64_as<T: serde::de::DeserializeOwned>(input: &str) -> Result<T, DecodeError> {
    let bytes = STANDARD.decode(input)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn decode_envelope(envelope: &BlockEnvelope) -> Result<DecodedBlock, DecodeError> {
    let payload = &envelope.payload_with_outputs;
    let miner_data = decode_base64_json(&payload.miner_data)?;
    let coinbase: CommandOutput = decode_base64_as(&payload.coinbase)?;

    let mut transactions = Vec::with_capacity(payload.transactions.len());
    for (cmd_b64, out_b64) in &payload.transactions {
        let cmd: SignedCommand = decode_base64_as(cmd_b64)?;
        let out: CommandOutput = decode_base64_as(out_b64)?;
        transactions.push((cmd, out));
    }

    Ok(DecodedBlock {
        header: envelope.header.clone(),
        miner_data,
        coinbase,
        transactions,
    })
}

/// The wire carries `featureFlags` as an unsigned 64-bit word; the column is
/// signed. Two's-complement wrap in both directions.
pub fn flags_to_signed(flags: u64) -> i64 {
    flags as i64
}

pub fn flags_to_unsigned(flags: i64) -> u64 {
    flags as u64
}

/// Decimal-string seconds since the epoch, as used by `creationTime` and
/// `epochStart`.
pub fn parse_seconds(input: &str) -> Result<DateTime<Utc>, DecodeError> {
    let secs: i64 = input
        .trim()
        .parse()
        .map_err(|_| DecodeError::Time(input.to_string()))?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| DecodeError::Time(input.to_string()))
}

/// Header `target` and `weight` are base64url words holding a little-endian
/// 256-bit integer.
pub fn decode_hash_number(input: &str) -> Result<BigDecimal, DecodeError> {
    let bytes = URL_SAFE_NO_PAD.decode(input)?;
    let int = BigInt::from_bytes_le(Sign::Plus, &bytes);
    Ok(BigDecimal::from(int))
}

/// Pact decimals arrive as a bare number, `{"decimal": "…"}` or
/// `{"int": …}`.
pub fn parse_pact_amount(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s).ok(),
        Value::Object(map) => {
            if let Some(Value::String(dec)) = map.get("decimal") {
                return BigDecimal::from_str(dec).ok();
            }
            match map.get("int") {
                Some(Value::Number(n)) => BigDecimal::from_str(&n.to_string()).ok(),
                Some(Value::String(s)) => BigDecimal::from_str(s).ok(),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn b64(value: &Value) -> String {
        STANDARD.encode(serde_json::to_vec(value).unwrap())
    }

    #[test]
    fn flags_reinterpretation_round_trips() {
        for flags in [0u64, 1, i64::MAX as u64, 1 << 63, u64::MAX] {
            assert_eq!(flags_to_unsigned(flags_to_signed(flags)), flags);
        }
        assert_eq!(flags_to_signed(u64::MAX), -1);
        assert_eq!(flags_to_signed(1 << 63), i64::MIN);
    }

    #[test]
    fn seconds_parse_from_decimal_strings() {
        let t = parse_seconds("1718000000").unwrap();
        assert_eq!(t.timestamp(), 1_718_000_000);
        assert!(parse_seconds("not-a-number").is_err());
    }

    #[test]
    fn payload_classifies_by_code_presence() {
        let exec: CommandPayload = serde_json::from_value(json!({
            "exec": {"code": "(coin.transfer \"a\" \"b\" 1.0)", "data": {}}
        }))
        .unwrap();
        assert!(matches!(
            exec.classify(),
            Some(PactPayload::Execution { .. })
        ));

        let cont: CommandPayload = serde_json::from_value(json!({
            "cont": {"pactId": "p1", "step": 1, "rollback": false, "data": {}}
        }))
        .unwrap();
        assert!(matches!(
            cont.classify(),
            Some(PactPayload::Continuation { step: 1, .. })
        ));
    }

    #[test]
    fn envelope_decode_unwraps_base64_layers() {
        let cmd = json!({
            "hash": "txhash-1",
            "sigs": [],
            "cmd": serde_json::to_string(&json!({
                "networkId": "mainnet01",
                "payload": {"exec": {"code": "(+ 1 1)", "data": {}}},
                "signers": [{"pubKey": "aa", "clist": []}],
                "meta": {"chainId": "0", "sender": "k:aa", "gasLimit": 600,
                         "gasPrice": 1.0e-7, "ttl": 600},
                "nonce": "n"
            }))
            .unwrap(),
        });
        let out = json!({
            "gas": 5,
            "reqKey": "txhash-1",
            "result": {"status": "success", "data": 2},
            "logs": "log-hash",
            "events": [],
            "txId": 42
        });
        let coinbase = json!({
            "gas": 0,
            "reqKey": "cb-req",
            "result": {"status": "success", "data": "Write succeeded"},
            "events": []
        });

        let envelope: BlockEnvelope = serde_json::from_value(json!({
            "header": {
                "chainId": 0,
                "height": 500,
                "hash": "h-500",
                "parent": "h-499",
                "creationTime": "1718000000",
                "epochStart": "1717990000",
                "featureFlags": 0,
                "nonce": "0",
                "payloadHash": "ph",
                "target": URL_SAFE_NO_PAD.encode([1u8; 32]),
                "weight": URL_SAFE_NO_PAD.encode([2u8; 32]),
                "adjacents": {"5": "adj-5"}
            },
            "payloadWithOutputs": {
                "minerData": b64(&json!({"account": "miner"})),
                "coinbase": b64(&coinbase),
                "payloadHash": "ph",
                "transactionsHash": "th",
                "outputsHash": "oh",
                "transactions": [[b64(&cmd), b64(&out)]]
            }
        }))
        .unwrap();

        let decoded = decode_envelope(&envelope).unwrap();
        assert_eq!(decoded.miner_data["account"], "miner");
        assert_eq!(decoded.coinbase.req_key, "cb-req");
        assert_eq!(decoded.transactions.len(), 1);
        let (cmd, out) = &decoded.transactions[0];
        assert_eq!(cmd.hash, "txhash-1");
        assert_eq!(out.tx_id, Some(42));

        let parsed: Command = serde_json::from_str(&cmd.cmd).unwrap();
        assert_eq!(parsed.signers.len(), 1);
        assert_eq!(parsed.meta.unwrap().sender.as_deref(), Some("k:aa"));
    }

    #[test]
    fn envelope_decode_rejects_invalid_base64() {
        let envelope: BlockEnvelope = serde_json::from_value(json!({
            "header": {
                "chainId": 0, "height": 1, "hash": "h", "parent": "p",
                "creationTime": "1", "epochStart": "1", "featureFlags": 0,
                "nonce": "0", "payloadHash": "ph", "target": "AA",
                "weight": "AA", "adjacents": {}
            },
            "payloadWithOutputs": {
                "minerData": "%%% not base64 %%%",
                "coinbase": b64(&json!({"reqKey": "cb"})),
                "payloadHash": "ph", "transactionsHash": "th",
                "outputsHash": "oh", "transactions": []
            }
        }))
        .unwrap();
        assert!(decode_envelope(&envelope).is_err());
    }

    #[test]
    fn hash_numbers_decode_little_endian() {
        let one = URL_SAFE_NO_PAD.encode({
            let mut bytes = [0u8; 32];
            bytes[0] = 1;
            bytes
        });
        assert_eq!(decode_hash_number(&one).unwrap(), BigDecimal::from(1));

        let two_fifty_six = URL_SAFE_NO_PAD.encode({
            let mut bytes = [0u8; 32];
            bytes[1] = 1;
            bytes
        });
        assert_eq!(
            decode_hash_number(&two_fifty_six).unwrap(),
            BigDecimal::from(256)
        );
    }

    #[test]
    fn pact_amounts_parse_all_shapes() {
        assert_eq!(
            parse_pact_amount(&json!(1.5)),
            BigDecimal::from_str("1.5").ok()
        );
        assert_eq!(
            parse_pact_amount(&json!({"decimal": "123.456"})),
            BigDecimal::from_str("123.456").ok()
        );
        assert_eq!(
            parse_pact_amount(&json!({"int": 7})),
            Some(BigDecimal::from(7))
        );
        assert_eq!(parse_pact_amount(&json!(["no"])), None);
    }

    #[test]
    fn source_round_trips_through_strings() {
        for source in [Source::Archive, Source::Api, Source::Backfill, Source::Streaming] {
            assert_eq!(source.to_string().parse::<Source>().unwrap(), source);
        }
        assert!("bogus".parse::<Source>().is_err());
    }
}
