//! The trust ledger: append-only, hash-chained, agent-signed entries,
//! built on the writer's transaction API for row mutation and on `sha2`
//! for the chaining hash.

pub mod signer;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::record::{self, Record, Value};
use crate::writer::Transaction;

use self::signer::{verifier_for, Algorithm, Signer};

const HASH_LEN: usize = 32;

/// One decoded `_sharc_ledger` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub sequence_number: i64,
    pub timestamp: i64,
    pub agent_id: String,
    pub payload: Vec<u8>,
    pub payload_hash: Vec<u8>,
    pub previous_hash: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Handle to the `_sharc_ledger` and `_sharc_agents` tables, addressed by
/// root page number the way [`Transaction`] addresses every other table.
pub struct Ledger {
    ledger_root: u32,
    agents_root: u32,
}

impl Ledger {
    pub fn new(ledger_root: u32, agents_root: u32) -> Self {
        Self { ledger_root, agents_root }
    }

    /// Appends a signed entry: computes the payload hash, chains it to the
    /// previous entry's hash, signs the preimage, and inserts the row.
    /// Returns the assigned sequence number.
    pub fn append(&self, txn: &mut Transaction, agent_id: &str, timestamp: i64, payload: &[u8], signer: &dyn Signer) -> Result<i64> {
        let existing = txn.scan_table(self.ledger_root)?;
        let sequence_number = existing.len() as i64 + 1;

        let previous_hash = match existing.last() {
            Some((_, bytes)) => decode_entry(bytes)?.payload_hash,
            None => vec![0u8; HASH_LEN],
        };

        let payload_hash = Sha256::digest(payload).to_vec();

        let mut preimage = Vec::with_capacity(8 + 8 + agent_id.len() + payload_hash.len() + previous_hash.len());
        preimage.extend_from_slice(&sequence_number.to_be_bytes());
        preimage.extend_from_slice(&timestamp.to_be_bytes());
        preimage.extend_from_slice(agent_id.as_bytes());
        preimage.extend_from_slice(&payload_hash);
        preimage.extend_from_slice(&previous_hash);

        let signature = signer.sign(&preimage);

        let record = record::encode(&[
            Value::Int64(sequence_number),
            Value::Int64(timestamp),
            Value::Text(agent_id.to_owned()),
            Value::Blob(payload.to_vec()),
            Value::Blob(payload_hash),
            Value::Blob(previous_hash),
            Value::Blob(signature),
        ]);
        txn.insert_row(self.ledger_root, sequence_number, &record)?;
        Ok(sequence_number)
    }

    /// Re-derives every hash and signature in the chain. Returns `false`
    /// (not an error) on the first mismatch found, since a broken chain is
    /// an expected outcome to check for, not a failure of the verifier
    /// itself.
    pub fn verify_integrity(&self, txn: &Transaction) -> Result<bool> {
        let rows = txn.scan_table(self.ledger_root)?;
        let mut expected_previous = vec![0u8; HASH_LEN];

        for (row_id, bytes) in &rows {
            let entry = decode_entry(bytes)?;
            if entry.sequence_number != *row_id {
                return Ok(false);
            }

            let recomputed_hash = Sha256::digest(&entry.payload).to_vec();
            if recomputed_hash != entry.payload_hash {
                return Ok(false);
            }
            if entry.previous_hash != expected_previous {
                return Ok(false);
            }

            let Some(agent_bytes) = txn.get_row(self.agents_root, agent_row_id(&entry.agent_id))? else {
                return Ok(false);
            };
            let agent = super::agents::decode_agent(&agent_bytes)?;
            if agent.agent_id != entry.agent_id {
                return Ok(false);
            }

            let mut preimage = Vec::with_capacity(8 + 8 + entry.agent_id.len() + HASH_LEN * 2);
            preimage.extend_from_slice(&entry.sequence_number.to_be_bytes());
            preimage.extend_from_slice(&entry.timestamp.to_be_bytes());
            preimage.extend_from_slice(entry.agent_id.as_bytes());
            preimage.extend_from_slice(&entry.payload_hash);
            preimage.extend_from_slice(&entry.previous_hash);

            let verifier = verifier_for(agent.algorithm, &agent.public_key)?;
            if verifier.verify(&preimage, &entry.signature).is_err() {
                return Ok(false);
            }

            expected_previous = entry.payload_hash;
        }

        Ok(true)
    }

    /// Returns the raw record bytes for every row with `sequence_number >=
    /// since`, in order.
    pub fn export_deltas(&self, txn: &Transaction, since: i64) -> Result<Vec<Vec<u8>>> {
        Ok(txn
            .scan_table(self.ledger_root)?
            .into_iter()
            .filter(|(row_id, _)| *row_id >= since)
            .map(|(_, bytes)| bytes)
            .collect())
    }
}

fn decode_entry(bytes: &[u8]) -> Result<LedgerEntry> {
    let values: Vec<Value> = Record::from(bytes).values().collect();
    if values.len() < 7 {
        return Err(Error::corrupt("_sharc_ledger row has fewer than 7 columns"));
    }
    Ok(LedgerEntry {
        sequence_number: values[0].as_int64().ok_or_else(|| Error::corrupt("ledger row missing SequenceNumber"))?,
        timestamp: values[1].as_int64().ok_or_else(|| Error::corrupt("ledger row missing Timestamp"))?,
        agent_id: values[2].as_text().ok_or_else(|| Error::corrupt("ledger row missing AgentId"))?.to_owned(),
        payload: values[3].as_blob().ok_or_else(|| Error::corrupt("ledger row missing Payload"))?.to_vec(),
        payload_hash: values[4].as_blob().ok_or_else(|| Error::corrupt("ledger row missing PayloadHash"))?.to_vec(),
        previous_hash: values[5].as_blob().ok_or_else(|| Error::corrupt("ledger row missing PreviousHash"))?.to_vec(),
        signature: values[6].as_blob().ok_or_else(|| Error::corrupt("ledger row missing Signature"))?.to_vec(),
    })
}

pub use super::agents::agent_row_id;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NoopTransform;
    use crate::page_source::MemorySource;
    use crate::pager::Pager;
    use crate::writer::{init_empty_database, Transaction};
    use signer::HmacSigner;

    fn new_pager() -> Pager {
        let source = Box::new(MemorySource::new(512));
        let pager = Pager::create(source, Box::new(NoopTransform), 512, 50).unwrap();
        init_empty_database(&pager).unwrap();
        pager
    }

    fn register_test_agent(txn: &mut Transaction, agents_root: u32, signer: &HmacSigner, agent_id: &str) {
        use crate::agents::{canonical_buffer, AgentInfo, AgentRegistry};

        let mut info = AgentInfo {
            agent_id: agent_id.to_owned(),
            class: 1,
            public_key: signer.public_key(),
            authority_ceiling: 10,
            write_scope: "*".to_owned(),
            read_scope: "*".to_owned(),
            validity_start: 0,
            validity_end: i64::MAX,
            parent_agent: None,
            co_sign_required: false,
            signature: Vec::new(),
            algorithm: Algorithm::Hmac,
        };
        info.signature = signer.sign(&canonical_buffer(&info));
        AgentRegistry::new(agents_root).register_agent(txn, info).unwrap();
    }

    fn create_ledger_tables(txn: &mut Transaction) -> (u32, u32) {
        let ledger_root = txn
            .create_table(
                "_sharc_ledger",
                "CREATE TABLE _sharc_ledger (SequenceNumber INTEGER PRIMARY KEY, Timestamp INTEGER, AgentId TEXT, Payload BLOB, PayloadHash BLOB, PreviousHash BLOB, Signature BLOB)",
            )
            .unwrap();
        let agents_root = txn
            .create_table(
                "_sharc_agents",
                "CREATE TABLE _sharc_agents (AgentId TEXT PRIMARY KEY, Class INTEGER, PublicKey BLOB, AuthorityCeiling INTEGER, WriteScope TEXT, ReadScope TEXT, ValidityStart INTEGER, ValidityEnd INTEGER, ParentAgent TEXT, CoSignRequired INTEGER, Signature BLOB, Algorithm INTEGER)",
            )
            .unwrap();
        (ledger_root, agents_root)
    }

    #[test]
    fn test_append_and_verify_round_trip() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let (ledger_root, agents_root) = create_ledger_tables(&mut txn);

        let signer = HmacSigner::new(b"agent-a-secret".to_vec());
        register_test_agent(&mut txn, agents_root, &signer, "agent-a");

        let ledger = Ledger::new(ledger_root, agents_root);
        ledger.append(&mut txn, "agent-a", 1000, b"first entry", &signer).unwrap();
        ledger.append(&mut txn, "agent-a", 1001, b"second entry", &signer).unwrap();
        txn.commit().unwrap();

        let txn = Transaction::begin(&pager);
        assert!(ledger.verify_integrity(&txn).unwrap());

        let deltas = ledger.export_deltas(&txn, 2).unwrap();
        assert_eq!(deltas.len(), 1);
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let (ledger_root, agents_root) = create_ledger_tables(&mut txn);

        let signer = HmacSigner::new(b"agent-a-secret".to_vec());
        register_test_agent(&mut txn, agents_root, &signer, "agent-a");

        let ledger = Ledger::new(ledger_root, agents_root);
        ledger.append(&mut txn, "agent-a", 1000, b"first entry", &signer).unwrap();

        let mut rows = txn.scan_table(ledger_root).unwrap();
        let (row_id, mut bytes) = rows.remove(0);
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        txn.update_row(ledger_root, row_id, &bytes).unwrap();
        txn.commit().unwrap();

        let txn = Transaction::begin(&pager);
        assert!(!ledger.verify_integrity(&txn).unwrap());
    }

    #[test]
    fn test_alternating_agents_mixed_algorithms() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let (ledger_root, agents_root) = create_ledger_tables(&mut txn);

        let hmac_signer = HmacSigner::new(b"agent-a-secret".to_vec());
        register_test_agent(&mut txn, agents_root, &hmac_signer, "agent-a");

        use crate::agents::{canonical_buffer, AgentInfo, AgentRegistry};
        use crate::ledger::signer::EcdsaP256Signer;
        use p256::ecdsa::SigningKey;

        let ecdsa_signer = EcdsaP256Signer::from_signing_key(SigningKey::from_bytes(&[9u8; 32].into()).unwrap());
        let mut b_info = AgentInfo {
            agent_id: "agent-b".to_owned(),
            class: 1,
            public_key: ecdsa_signer.public_key(),
            authority_ceiling: 10,
            write_scope: "*".to_owned(),
            read_scope: "*".to_owned(),
            validity_start: 0,
            validity_end: i64::MAX,
            parent_agent: None,
            co_sign_required: false,
            signature: Vec::new(),
            algorithm: Algorithm::EcdsaP256,
        };
        b_info.signature = ecdsa_signer.sign(&canonical_buffer(&b_info));
        AgentRegistry::new(agents_root).register_agent(&mut txn, b_info).unwrap();

        let ledger = Ledger::new(ledger_root, agents_root);
        ledger.append(&mut txn, "agent-a", 1, b"a speaks", &hmac_signer).unwrap();
        ledger.append(&mut txn, "agent-b", 2, b"b speaks", &ecdsa_signer).unwrap();
        ledger.append(&mut txn, "agent-a", 3, b"a speaks again", &hmac_signer).unwrap();
        ledger.append(&mut txn, "agent-b", 4, b"b speaks again", &ecdsa_signer).unwrap();
        txn.commit().unwrap();

        let txn = Transaction::begin(&pager);
        assert!(ledger.verify_integrity(&txn).unwrap());
    }
}
