use serde::Deserialize;
use serde_json::Value;

use crate::error::{LedgerError, LedgerResult};

// ============================================================================
// Account Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AccountCommand {
    CreateAccount { initial_coins: i64 },
    AddCoins { amount: i64 },
    DeductCoins { amount: i64 },
    SetCoins { coins: i64 },
    TransferCoins { to_account_id: String, amount: i64 },
    DeleteAccount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountRequest {
    #[serde(default)]
    initial_coins: i64,
}

#[derive(Deserialize)]
struct AmountRequest {
    amount: i64,
}

#[derive(Deserialize)]
struct SetCoinsRequest {
    coins: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest {
    to_account_id: String,
    amount: i64,
}

impl AccountCommand {
    /// Parse a named command with its JSON payload.
    pub fn from_request(name: &str, payload: &Value) -> LedgerResult<Self> {
        let command = match name {
            "CreateAccount" => {
                let req: CreateAccountRequest = parse(name, payload)?;
                AccountCommand::CreateAccount { initial_coins: req.initial_coins }
            }
            "AddCoins" => AccountCommand::AddCoins {
                amount: parse::<AmountRequest>(name, payload)?.amount,
            },
            "DeductCoins" => AccountCommand::DeductCoins {
                amount: parse::<AmountRequest>(name, payload)?.amount,
            },
            "SetCoins" => AccountCommand::SetCoins {
                coins: parse::<SetCoinsRequest>(name, payload)?.coins,
            },
            "TransferCoins" => {
                let req: TransferRequest = parse(name, payload)?;
                AccountCommand::TransferCoins {
                    to_account_id: req.to_account_id,
                    amount: req.amount,
                }
            }
            "DeleteAccount" => AccountCommand::DeleteAccount,
            other => {
                return Err(LedgerError::invalid_argument(format!("unknown command {}", other)));
            }
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccountCommand::CreateAccount { .. } => "CreateAccount",
            AccountCommand::AddCoins { .. } => "AddCoins",
            AccountCommand::DeductCoins { .. } => "DeductCoins",
            AccountCommand::SetCoins { .. } => "SetCoins",
            AccountCommand::TransferCoins { .. } => "TransferCoins",
            AccountCommand::DeleteAccount => "DeleteAccount",
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(name: &str, payload: &Value) -> LedgerResult<T> {
    // a missing body is read as an empty object
    let payload = if payload.is_null() { Value::Object(Default::default()) } else { payload.clone() };
    serde_json::from_value(payload)
        .map_err(|e| LedgerError::invalid_argument(format!("invalid {} payload: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_transfer() {
        let cmd = AccountCommand::from_request("TransferCoins", &json!({ "toAccountId": "acc-2", "amount": 7 })).unwrap();
        assert_eq!(
            cmd,
            AccountCommand::TransferCoins { to_account_id: "acc-2".to_string(), amount: 7 }
        );
        assert_eq!(cmd.name(), "TransferCoins");
    }

    #[test]
    fn test_create_defaults_to_zero() {
        let cmd = AccountCommand::from_request("CreateAccount", &Value::Null).unwrap();
        assert_eq!(cmd, AccountCommand::CreateAccount { initial_coins: 0 });
    }

    #[test]
    fn test_unknown_command_and_bad_payload() {
        assert!(matches!(
            AccountCommand::from_request("MintCoins", &json!({})),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            AccountCommand::from_request("AddCoins", &json!({ "amount": "lots" })),
            Err(LedgerError::InvalidArgument(_))
        ));
    }
}
