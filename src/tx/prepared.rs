//! Prepared-transaction payloads from upstream swap APIs
//!
//! Three upstream shapes exist in the wild: a `steps[]` array, a bare
//! to/data/value object, and the 0x-protocol quote object (carries
//! `allowanceTarget`). Detection is an explicit, exhaustive parse into a
//! tagged union rather than a chain of duck-typed probes.

use crate::error::{FlowError, FlowResult};

use ethers::types::{Address, Bytes, U256};
use serde_json::Value;
use std::str::FromStr;

/// One executable call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallData {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// A prepared transaction in one of the recognized upstream shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedTransaction {
    /// Ordered multi-call sequence (Brian-API style `steps[]`)
    Steps(Vec<CallData>),
    /// Single bare transaction object
    Direct(CallData),
    /// 0x-protocol quote; the allowance target must be approved first
    ZeroEx {
        call: CallData,
        allowance_target: Address,
    },
}

impl PreparedTransaction {
    /// Parse an upstream JSON payload into its tagged shape.
    ///
    /// Detection order matters only for disambiguation: a payload with
    /// `steps` is always `Steps`; a to/data object with `allowanceTarget`
    /// is `ZeroEx`; a plain to/data object is `Direct`. Anything else is a
    /// typed error.
    pub fn parse(payload: &Value) -> FlowResult<Self> {
        if let Some(steps) = payload.get("steps").and_then(|s| s.as_array()) {
            if steps.is_empty() {
                return Err(FlowError::PreparedShape("empty steps array".into()));
            }
            let calls = steps
                .iter()
                .map(parse_call)
                .collect::<FlowResult<Vec<_>>>()?;
            return Ok(PreparedTransaction::Steps(calls));
        }

        if payload.get("to").is_some() && payload.get("data").is_some() {
            let call = parse_call(payload)?;
            if let Some(target) = payload.get("allowanceTarget") {
                let allowance_target = parse_address(target)?;
                return Ok(PreparedTransaction::ZeroEx {
                    call,
                    allowance_target,
                });
            }
            return Ok(PreparedTransaction::Direct(call));
        }

        Err(FlowError::PreparedShape(format!(
            "no steps[], to/data, or 0x quote fields in payload: {}",
            truncate(payload)
        )))
    }

    /// The calls to execute, in order
    pub fn calls(&self) -> Vec<CallData> {
        match self {
            PreparedTransaction::Steps(calls) => calls.clone(),
            PreparedTransaction::Direct(call) => vec![call.clone()],
            PreparedTransaction::ZeroEx { call, .. } => vec![call.clone()],
        }
    }

    /// Spender requiring an ERC-20 approval before execution, if any
    pub fn allowance_target(&self) -> Option<Address> {
        match self {
            PreparedTransaction::ZeroEx {
                allowance_target, ..
            } => Some(*allowance_target),
            _ => None,
        }
    }
}

fn parse_call(obj: &Value) -> FlowResult<CallData> {
    let to = obj
        .get("to")
        .ok_or_else(|| FlowError::PreparedShape("step missing `to`".into()))?;
    let data = obj
        .get("data")
        .and_then(|d| d.as_str())
        .ok_or_else(|| FlowError::PreparedShape("step missing `data`".into()))?;

    let data = Bytes::from_str(data)
        .map_err(|e| FlowError::PreparedShape(format!("bad calldata hex: {}", e)))?;

    let value = match obj.get("value") {
        Some(v) => parse_amount(v)?,
        None => U256::zero(),
    };

    Ok(CallData {
        to: parse_address(to)?,
        data,
        value,
    })
}

fn parse_address(v: &Value) -> FlowResult<Address> {
    let s = v
        .as_str()
        .ok_or_else(|| FlowError::PreparedShape("address is not a string".into()))?;
    Address::from_str(s).map_err(|e| FlowError::PreparedShape(format!("bad address {}: {}", s, e)))
}

/// Amounts arrive as JSON numbers, decimal strings, or 0x-hex strings
pub(crate) fn parse_amount(v: &Value) -> FlowResult<U256> {
    match v {
        Value::Number(n) => {
            let n = n
                .as_u64()
                .ok_or_else(|| FlowError::PreparedShape("non-integer value".into()))?;
            Ok(U256::from(n))
        }
        Value::String(s) => {
            if let Some(hex) = s.strip_prefix("0x") {
                U256::from_str_radix(hex, 16)
                    .map_err(|e| FlowError::PreparedShape(format!("bad hex value {}: {}", s, e)))
            } else {
                U256::from_dec_str(s)
                    .map_err(|e| FlowError::PreparedShape(format!("bad decimal value {}: {}", s, e)))
            }
        }
        Value::Null => Ok(U256::zero()),
        other => Err(FlowError::PreparedShape(format!(
            "unsupported value type: {}",
            other
        ))),
    }
}

fn truncate(v: &Value) -> String {
    let s = v.to_string();
    if s.len() > 120 {
        format!("{}...", &s[..120])
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TO: &str = "0x0000000000000000000000000000000000000001";
    const TARGET: &str = "0x0000000000000000000000000000000000000002";

    #[test]
    fn parses_steps_shape() {
        let payload = json!({
            "steps": [
                { "to": TO, "data": "0xdeadbeef", "value": "0" },
                { "to": TO, "data": "0xcafe", "value": "1000000000000000000" }
            ]
        });
        match PreparedTransaction::parse(&payload).unwrap() {
            PreparedTransaction::Steps(calls) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[1].value, U256::exp10(18));
            }
            other => panic!("expected Steps, got {:?}", other),
        }
    }

    #[test]
    fn parses_direct_shape() {
        let payload = json!({ "to": TO, "data": "0xdeadbeef", "value": "0x0" });
        match PreparedTransaction::parse(&payload).unwrap() {
            PreparedTransaction::Direct(call) => {
                assert_eq!(call.value, U256::zero());
                assert_eq!(call.data.to_vec(), vec![0xde, 0xad, 0xbe, 0xef]);
            }
            other => panic!("expected Direct, got {:?}", other),
        }
    }

    #[test]
    fn parses_zero_ex_shape() {
        let payload = json!({
            "to": TO,
            "data": "0x00",
            "value": 0,
            "allowanceTarget": TARGET,
            "price": "0.29"
        });
        match PreparedTransaction::parse(&payload).unwrap() {
            PreparedTransaction::ZeroEx {
                allowance_target, ..
            } => {
                assert_eq!(allowance_target, Address::from_str(TARGET).unwrap());
            }
            other => panic!("expected ZeroEx, got {:?}", other),
        }
    }

    #[test]
    fn unknown_shape_is_typed_error() {
        let payload = json!({ "price": "0.29", "liquidityAvailable": true });
        let err = PreparedTransaction::parse(&payload).unwrap_err();
        assert!(matches!(err, FlowError::PreparedShape(_)));
    }

    #[test]
    fn empty_steps_rejected() {
        let payload = json!({ "steps": [] });
        assert!(PreparedTransaction::parse(&payload).is_err());
    }

    #[test]
    fn missing_value_defaults_to_zero() {
        let payload = json!({ "to": TO, "data": "0x" });
        let parsed = PreparedTransaction::parse(&payload).unwrap();
        assert_eq!(parsed.calls()[0].value, U256::zero());
    }
}
