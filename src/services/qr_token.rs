use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;
use uuid::Uuid;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies the per-table token printed in a table's QR code.
///
/// The token is `hex(HMAC-SHA256(secret, "{table_id}:{qr_version}"))`, so
/// bumping a table's `qr_version` invalidates every code printed before.
#[derive(Clone)]
pub struct QrTokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for QrTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QrTokenSigner").finish_non_exhaustive()
    }
}

impl QrTokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, table_id: Uuid, qr_version: i32) -> Result<HmacSha256, ServiceError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ServiceError::InternalError(format!("qr token key: {e}")))?;
        mac.update(format!("{table_id}:{qr_version}").as_bytes());
        Ok(mac)
    }

    pub fn sign(&self, table_id: Uuid, qr_version: i32) -> Result<String, ServiceError> {
        Ok(hex::encode(self.mac(table_id, qr_version)?.finalize().into_bytes()))
    }

    /// Constant-time comparison against the expected token.
    pub fn verify(&self, table_id: Uuid, qr_version: i32, token: &str) -> bool {
        let Ok(provided) = hex::decode(token.trim()) else {
            return false;
        };
        match self.mac(table_id, qr_version) {
            Ok(mac) => mac.verify_slice(&provided).is_ok(),
            Err(_) => false,
        }
    }

    /// `{order_page_url}?table={id}&token={token}`
    pub fn table_url(
        &self,
        order_page_url: &str,
        table_id: Uuid,
        qr_version: i32,
    ) -> Result<String, ServiceError> {
        let token = self.sign(table_id, qr_version)?;
        let mut url = Url::parse(order_page_url).map_err(|e| {
            ServiceError::InternalError(format!("invalid order page url {order_page_url}: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("table", &table_id.to_string())
            .append_pair("token", &token);
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> QrTokenSigner {
        QrTokenSigner::new("unit-test-secret-value")
    }

    #[test]
    fn signed_token_verifies() {
        let table = Uuid::new_v4();
        let token = signer().sign(table, 1).unwrap();
        assert_eq!(token.len(), 64);
        assert!(signer().verify(table, 1, &token));
    }

    #[test]
    fn token_is_bound_to_table_version_and_secret() {
        let table = Uuid::new_v4();
        let token = signer().sign(table, 1).unwrap();
        assert!(!signer().verify(table, 2, &token));
        assert!(!signer().verify(Uuid::new_v4(), 1, &token));
        assert!(!QrTokenSigner::new("another-secret-value").verify(table, 1, &token));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let table = Uuid::new_v4();
        assert!(!signer().verify(table, 1, "not-hex"));
        assert!(!signer().verify(table, 1, ""));
        assert!(!signer().verify(table, 1, "abcd"));
    }

    #[test]
    fn table_url_carries_table_and_token() {
        let table = Uuid::new_v4();
        let url = signer()
            .table_url("http://localhost:3000/order", table, 3)
            .unwrap();
        let token = signer().sign(table, 3).unwrap();
        assert_eq!(
            url,
            format!("http://localhost:3000/order?table={table}&token={token}")
        );
    }
}
