//! Block templates as reported by the node.

use serde::Deserialize;

/// The subset of a `getblocktemplate` result that job assembly needs.
///
/// Deserialized straight from the RPC `result` object; unknown fields are
/// ignored. Produced fresh on every successful poll and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockTemplate {
    /// Previous block hash, big-endian display hex
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,

    /// Height of the block being built
    pub height: u64,

    /// Total reward available to the coinbase, in satoshis
    #[serde(rename = "coinbasevalue", default)]
    pub coinbase_value: u64,

    /// Full 256-bit target as hex
    #[serde(default)]
    pub target: Option<String>,

    /// Compact target (nbits) as hex
    #[serde(default)]
    pub bits: Option<String>,

    /// Node's suggested header time
    #[serde(rename = "curtime", default)]
    pub cur_time: Option<u32>,

    /// Candidate transactions, in block order
    #[serde(default)]
    pub transactions: Vec<TemplateTransaction>,
}

/// One entry of the template's transaction list.
///
/// Nodes report objects with a `txid` field; bare id strings are accepted
/// as well.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TemplateTransaction {
    Id(String),
    Entry {
        #[serde(default)]
        txid: Option<String>,
    },
}

impl TemplateTransaction {
    pub fn txid(&self) -> Option<&str> {
        match self {
            TemplateTransaction::Id(id) => Some(id.as_str()),
            TemplateTransaction::Entry { txid } => txid.as_deref(),
        }
        .filter(|id| !id.is_empty())
    }
}

impl BlockTemplate {
    /// Transaction ids in block order, skipping entries without one.
    pub fn txids(&self) -> Vec<&str> {
        self.transactions
            .iter()
            .filter_map(TemplateTransaction::txid)
            .collect()
    }

    /// Target advertised to workers: the full target if the node sent one,
    /// otherwise the compact bits.
    pub fn advertised_target(&self) -> String {
        self.target
            .as_deref()
            .or(self.bits.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_node_result() {
        let template: BlockTemplate = serde_json::from_value(json!({
            "version": 536870912,
            "previousblockhash": "00".repeat(32),
            "height": 881423,
            "coinbasevalue": 312500000,
            "target": "0000000000000000000246c8",
            "bits": "17023a04",
            "curtime": 1737000000,
            "transactions": [
                {"data": "0100", "txid": "aa".repeat(32), "fee": 100},
                "bb".repeat(32),
                {"data": "0200"},
            ],
            "rules": ["segwit"],
        }))
        .unwrap();

        assert_eq!(template.height, 881_423);
        assert_eq!(template.coinbase_value, 312_500_000);
        assert_eq!(template.cur_time, Some(1_737_000_000));
        assert_eq!(template.bits.as_deref(), Some("17023a04"));
        assert_eq!(template.txids(), vec!["aa".repeat(32), "bb".repeat(32)]);
        assert_eq!(template.advertised_target(), "0000000000000000000246c8");
    }

    #[test]
    fn minimal_template() {
        let template: BlockTemplate = serde_json::from_value(json!({
            "height": 100,
            "previousblockhash": "00".repeat(32),
            "transactions": [],
        }))
        .unwrap();

        assert!(template.txids().is_empty());
        assert_eq!(template.coinbase_value, 0);
        assert_eq!(template.advertised_target(), "");
    }

    #[test]
    fn target_falls_back_to_bits() {
        let template: BlockTemplate = serde_json::from_value(json!({
            "height": 1,
            "previousblockhash": "00".repeat(32),
            "bits": "1d00ffff",
        }))
        .unwrap();

        assert_eq!(template.advertised_target(), "1d00ffff");
    }
}
