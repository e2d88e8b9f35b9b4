//! Client configuration.
//!
//! Every tunable limit of the group state machine lives in [`ClientConfig`],
//! passed explicitly with each operation. There is no process-wide state.

use serde::{Deserialize, Serialize};

/// Ninety days, the default key package validity window.
pub const DEFAULT_KEY_PACKAGE_LIFETIME_SECS: u64 = 90 * 24 * 60 * 60;

/// Limits and policy switches for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Generations a receiver ratchets forward to reach a message key
    pub max_forward_ratchet: u32,
    /// Skipped message keys retained per ratchet for late messages
    pub out_of_order_tolerance: u32,
    /// Prior epochs whose receive keys are kept for late application messages
    pub max_past_epochs: usize,
    /// Private message content is zero-padded to a multiple of this size
    /// (0 disables padding)
    pub padding_block: usize,
    /// Send proposals and commits as private messages
    pub encrypt_handshake: bool,
    /// Include the ratchet tree extension in Welcome group infos
    pub ratchet_tree_extension: bool,
    /// Validity window of generated key packages
    pub key_package_lifetime_secs: u64,
    /// Reject key packages outside their lifetime
    pub validate_lifetimes: bool,
    /// Own resumption PSKs retained for reinit and branch
    pub max_resumption_psks: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_forward_ratchet: 1000,
            out_of_order_tolerance: 16,
            max_past_epochs: 3,
            padding_block: 0,
            encrypt_handshake: false,
            ratchet_tree_extension: true,
            key_package_lifetime_secs: DEFAULT_KEY_PACKAGE_LIFETIME_SECS,
            validate_lifetimes: true,
            max_resumption_psks: 8,
        }
    }
}

impl ClientConfig {
    /// Zero bytes to append to `content_len` bytes of private content.
    pub fn padding_for(&self, content_len: usize) -> usize {
        if self.padding_block == 0 {
            return 0;
        }
        let remainder = content_len % self.padding_block;
        if remainder == 0 { 0 } else { self.padding_block - remainder }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_forward_ratchet, 1000);
        assert_eq!(config.out_of_order_tolerance, 16);
        assert_eq!(config.max_past_epochs, 3);
        assert_eq!(config.key_package_lifetime_secs, 7_776_000);
        assert!(config.ratchet_tree_extension);
        assert!(!config.encrypt_handshake);
    }

    #[test]
    fn padding_rounds_up_to_block() {
        let config = ClientConfig { padding_block: 32, ..ClientConfig::default() };
        assert_eq!(config.padding_for(0), 0);
        assert_eq!(config.padding_for(1), 31);
        assert_eq!(config.padding_for(32), 0);
        assert_eq!(config.padding_for(33), 31);
        assert_eq!(ClientConfig::default().padding_for(17), 0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"max_past_epochs": 5, "encrypt_handshake": true}"#).unwrap();
        assert_eq!(config.max_past_epochs, 5);
        assert!(config.encrypt_handshake);
        assert_eq!(config.out_of_order_tolerance, 16);
    }
}
