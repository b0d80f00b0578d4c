use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::BankConfig;
use crate::errors::ServiceError;

const VIETQR_IMAGE_BASE: &str = "https://img.vietqr.io/image";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BankInfo {
    pub bank_code: String,
    pub account_no: String,
    pub account_name: Option<String>,
}

/// Quick-link QR image plus the details printed next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentQrData {
    pub qr_url: String,
    pub amount: Decimal,
    pub add_info: String,
    pub bank_info: BankInfo,
}

pub fn order_transfer_note(order_id: Uuid) -> String {
    format!("Thanh toan don {order_id}")
}

pub fn session_transfer_note(session_id: Uuid) -> String {
    format!("Thanh toan phien {session_id}")
}

fn required(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Builds the VietQR quick link for a bank transfer of `amount`.
pub fn build_payment_qr(
    bank: &BankConfig,
    amount: Decimal,
    add_info: &str,
) -> Result<PaymentQrData, ServiceError> {
    let (Some(bank_code), Some(account_no)) = (required(&bank.bank_code), required(&bank.account_no))
    else {
        return Err(ServiceError::ExternalServiceError(
            "bank account for QR payments is not configured".to_string(),
        ));
    };

    let image = format!(
        "{VIETQR_IMAGE_BASE}/{bank_code}-{account_no}-{}.png",
        bank.template
    );
    let mut url = Url::parse(&image)
        .map_err(|e| ServiceError::ExternalServiceError(format!("invalid QR url: {e}")))?;
    let amount = amount.trunc().normalize();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("amount", &amount.to_string())
            .append_pair("addInfo", add_info);
        if let Some(name) = required(&bank.account_name) {
            query.append_pair("accountName", name);
        }
    }

    Ok(PaymentQrData {
        qr_url: url.into(),
        amount,
        add_info: add_info.to_string(),
        bank_info: BankInfo {
            bank_code: bank_code.to_string(),
            account_no: account_no.to_string(),
            account_name: required(&bank.account_name).map(str::to_string),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn bank() -> BankConfig {
        BankConfig {
            bank_code: Some("970436".into()),
            account_no: Some("0123456789".into()),
            account_name: Some("NHA HANG ABC".into()),
            ..Default::default()
        }
    }

    #[test]
    fn builds_quick_link_with_amount_and_note() {
        let order_id = Uuid::nil();
        let qr = build_payment_qr(&bank(), dec!(540000.0000), &order_transfer_note(order_id)).unwrap();

        assert!(qr
            .qr_url
            .starts_with("https://img.vietqr.io/image/970436-0123456789-compact2.png?amount=540000&addInfo="));
        assert!(qr.qr_url.contains("accountName=NHA+HANG+ABC"));
        assert_eq!(qr.amount, dec!(540000));
        assert_eq!(qr.add_info, format!("Thanh toan don {order_id}"));
        assert_eq!(qr.bank_info.bank_code, "970436");
    }

    #[test]
    fn account_name_is_optional() {
        let mut cfg = bank();
        cfg.account_name = None;
        let qr = build_payment_qr(&cfg, dec!(1000), "x").unwrap();
        assert!(!qr.qr_url.contains("accountName"));
        assert_eq!(qr.bank_info.account_name, None);
    }

    #[test]
    fn missing_bank_identity_is_an_external_error() {
        let err = build_payment_qr(&BankConfig::default(), dec!(1000), "x").unwrap_err();
        assert_matches!(err, ServiceError::ExternalServiceError(_));

        let mut blank = bank();
        blank.account_no = Some("  ".into());
        assert_matches!(
            build_payment_qr(&blank, dec!(1000), "x"),
            Err(ServiceError::ExternalServiceError(_))
        );
    }
}
