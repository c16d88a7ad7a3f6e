use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event_sourcing::core::DomainEvent;

// ============================================================================
// Account Events - Domain Events for Account Aggregate
// ============================================================================
//
// Stored payloads carry only the inner struct; the variant name is the
// envelope's event_type.
//
// ============================================================================

/// Account Event - Union type for all account events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AccountEvent {
    AccountCreated(AccountCreated),
    CoinsAdded(CoinsAdded),
    CoinsDeducted(CoinsDeducted),
    CoinsSet(CoinsSet),
    CoinsTransferred(CoinsTransferred),
    CoinsReceived(CoinsReceived),
    AccountDeleted(AccountDeleted),
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountCreated(_) => "AccountCreated",
            AccountEvent::CoinsAdded(_) => "CoinsAdded",
            AccountEvent::CoinsDeducted(_) => "CoinsDeducted",
            AccountEvent::CoinsSet(_) => "CoinsSet",
            AccountEvent::CoinsTransferred(_) => "CoinsTransferred",
            AccountEvent::CoinsReceived(_) => "CoinsReceived",
            AccountEvent::AccountDeleted(_) => "AccountDeleted",
        }
    }

    fn decode(event_type: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error> {
        let payload = payload.clone();
        let event = match event_type {
            "AccountCreated" => AccountEvent::AccountCreated(serde_json::from_value(payload)?),
            "CoinsAdded" => AccountEvent::CoinsAdded(serde_json::from_value(payload)?),
            "CoinsDeducted" => AccountEvent::CoinsDeducted(serde_json::from_value(payload)?),
            "CoinsSet" => AccountEvent::CoinsSet(serde_json::from_value(payload)?),
            "CoinsTransferred" => AccountEvent::CoinsTransferred(serde_json::from_value(payload)?),
            "CoinsReceived" => AccountEvent::CoinsReceived(serde_json::from_value(payload)?),
            "AccountDeleted" => AccountEvent::AccountDeleted(serde_json::from_value(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            AccountEvent::AccountCreated(e) => serde_json::to_value(e),
            AccountEvent::CoinsAdded(e) => serde_json::to_value(e),
            AccountEvent::CoinsDeducted(e) => serde_json::to_value(e),
            AccountEvent::CoinsSet(e) => serde_json::to_value(e),
            AccountEvent::CoinsTransferred(e) => serde_json::to_value(e),
            AccountEvent::CoinsReceived(e) => serde_json::to_value(e),
            AccountEvent::AccountDeleted(e) => serde_json::to_value(e),
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Account Created - Initial event in account lifecycle
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountCreated {
    pub account_id: String,
    pub initial_coins: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoinsAdded {
    pub amount: i64,
    pub previous_balance: i64,
    pub new_balance: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoinsDeducted {
    pub amount: i64,
    pub previous_balance: i64,
    pub new_balance: i64,
}

/// Coins Set - Administrative balance overwrite
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoinsSet {
    pub previous_balance: i64,
    pub new_balance: i64,
}

/// Coins Transferred - Debit side of a transfer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoinsTransferred {
    pub to_account_id: String,
    pub amount: i64,
    pub previous_balance: i64,
    pub new_balance: i64,
}

/// Coins Received - Credit side of a transfer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoinsReceived {
    pub from_account_id: String,
    pub amount: i64,
    pub previous_balance: i64,
    pub new_balance: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountDeleted {
    pub final_balance: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_has_no_type_tag() {
        let event = AccountEvent::CoinsAdded(CoinsAdded {
            amount: 10,
            previous_balance: 0,
            new_balance: 10,
        });

        let payload = event.to_payload().unwrap();
        assert_eq!(payload, json!({ "amount": 10, "previousBalance": 0, "newBalance": 10 }));
        assert_eq!(event.event_type(), "CoinsAdded");
    }

    #[test]
    fn test_decode_known_type() {
        let payload = json!({ "toAccountId": "acc-2", "amount": 5, "previousBalance": 9, "newBalance": 4 });

        let decoded = AccountEvent::decode("CoinsTransferred", &payload).unwrap();
        match decoded {
            Some(AccountEvent::CoinsTransferred(e)) => {
                assert_eq!(e.to_account_id, "acc-2");
                assert_eq!(e.new_balance, 4);
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_type_is_none() {
        let decoded = AccountEvent::decode("CoinsBurned", &json!({})).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_decode_bad_payload_is_error() {
        assert!(AccountEvent::decode("CoinsAdded", &json!({ "amount": "ten" })).is_err());
    }
}
