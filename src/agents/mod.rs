//! The agent registry: a signature-verified public-key directory backing
//! the trust ledger, built on the writer's transaction API the same way
//! [`crate::ledger`] is.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::ledger::signer::{verifier_for, Algorithm};
use crate::record::{self, Record, Value};
use crate::writer::Transaction;

/// One `_sharc_agents` row, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInfo {
    pub agent_id: String,
    pub class: i64,
    pub public_key: Vec<u8>,
    pub authority_ceiling: i64,
    pub write_scope: String,
    pub read_scope: String,
    pub validity_start: i64,
    pub validity_end: i64,
    pub parent_agent: Option<String>,
    pub co_sign_required: bool,
    pub signature: Vec<u8>,
    pub algorithm: Algorithm,
}

/// Handle to the `_sharc_agents` table, addressed by root page number.
pub struct AgentRegistry {
    agents_root: u32,
}

impl AgentRegistry {
    pub fn new(agents_root: u32) -> Self {
        Self { agents_root }
    }

    /// Verifies `info.signature` against `info`'s own enclosed public key
    /// over the canonical buffer, then upserts the row. `info.signature`
    /// must already have been produced by the agent's own signer over
    /// [`canonical_buffer`] of this same `info` (with the signature field
    /// itself excluded from what is signed).
    pub fn register_agent(&self, txn: &mut Transaction, info: AgentInfo) -> Result<()> {
        let buffer = canonical_buffer(&info);
        let verifier = verifier_for(info.algorithm, &info.public_key)?;
        verifier.verify(&buffer, &info.signature).map_err(|_| Error::InvalidSignature)?;

        let row_id = agent_row_id(&info.agent_id);
        let record = encode_agent(&info);
        txn.upsert_row(self.agents_root, row_id, &record)?;
        Ok(())
    }

    /// Looks up an agent by id.
    pub fn get_agent(&self, txn: &Transaction, agent_id: &str) -> Result<AgentInfo> {
        let bytes = txn.get_row(self.agents_root, agent_row_id(agent_id))?.ok_or(Error::NotFound)?;
        let info = decode_agent(&bytes)?;
        if info.agent_id != agent_id {
            // Extraordinarily unlikely rowid-hash collision between two
            // distinct agent ids; surface as not-found rather than
            // silently returning the wrong agent.
            return Err(Error::NotFound);
        }
        Ok(info)
    }
}

/// Maps an `AgentId` to a deterministic table rowid so registry/ledger
/// lookups and upserts can descend the b-tree directly instead of
/// scanning, even though `AgentId` itself is the table's logical (TEXT)
/// primary key rather than an `INTEGER PRIMARY KEY` rowid alias.
pub fn agent_row_id(agent_id: &str) -> i64 {
    let digest = Sha256::digest(agent_id.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(buf) & i64::MAX
}

/// The canonical verification buffer: integers big-endian, strings UTF-8,
/// the `Signature` field itself excluded.
pub fn canonical_buffer(info: &AgentInfo) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(info.agent_id.as_bytes());
    buf.extend_from_slice(&info.class.to_be_bytes());
    buf.extend_from_slice(&info.public_key);
    buf.extend_from_slice(&info.authority_ceiling.to_be_bytes());
    buf.extend_from_slice(info.write_scope.as_bytes());
    buf.extend_from_slice(info.read_scope.as_bytes());
    buf.extend_from_slice(&info.validity_start.to_be_bytes());
    buf.extend_from_slice(&info.validity_end.to_be_bytes());
    buf.extend_from_slice(info.parent_agent.as_deref().unwrap_or("").as_bytes());
    buf.extend_from_slice(&(info.co_sign_required as i64).to_be_bytes());
    buf
}

fn encode_agent(info: &AgentInfo) -> Vec<u8> {
    record::encode(&[
        Value::Text(info.agent_id.clone()),
        Value::Int64(info.class),
        Value::Blob(info.public_key.clone()),
        Value::Int64(info.authority_ceiling),
        Value::Text(info.write_scope.clone()),
        Value::Text(info.read_scope.clone()),
        Value::Int64(info.validity_start),
        Value::Int64(info.validity_end),
        match &info.parent_agent {
            Some(p) => Value::Text(p.clone()),
            None => Value::Null,
        },
        Value::Int64(info.co_sign_required as i64),
        Value::Blob(info.signature.clone()),
        Value::Int64(info.algorithm.code()),
    ])
}

pub(crate) fn decode_agent(bytes: &[u8]) -> Result<AgentInfo> {
    let values: Vec<Value> = Record::from(bytes).values().collect();
    if values.len() < 11 {
        return Err(Error::corrupt("_sharc_agents row has fewer than 11 columns"));
    }
    Ok(AgentInfo {
        agent_id: values[0].as_text().ok_or_else(|| Error::corrupt("agent row missing AgentId"))?.to_owned(),
        class: values[1].as_int64().ok_or_else(|| Error::corrupt("agent row missing Class"))?,
        public_key: values[2].as_blob().ok_or_else(|| Error::corrupt("agent row missing PublicKey"))?.to_vec(),
        authority_ceiling: values[3].as_int64().ok_or_else(|| Error::corrupt("agent row missing AuthorityCeiling"))?,
        write_scope: values[4].as_text().ok_or_else(|| Error::corrupt("agent row missing WriteScope"))?.to_owned(),
        read_scope: values[5].as_text().ok_or_else(|| Error::corrupt("agent row missing ReadScope"))?.to_owned(),
        validity_start: values[6].as_int64().ok_or_else(|| Error::corrupt("agent row missing ValidityStart"))?,
        validity_end: values[7].as_int64().ok_or_else(|| Error::corrupt("agent row missing ValidityEnd"))?,
        parent_agent: values[8].as_text().map(str::to_owned),
        co_sign_required: values[9].as_int64().unwrap_or(0) != 0,
        signature: values[10].as_blob().ok_or_else(|| Error::corrupt("agent row missing Signature"))?.to_vec(),
        algorithm: Algorithm::from_code(values.get(11).and_then(|v| v.as_int64()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NoopTransform;
    use crate::ledger::signer::{HmacSigner, Signer};
    use crate::page_source::MemorySource;
    use crate::pager::Pager;
    use crate::writer::init_empty_database;

    fn new_pager() -> Pager {
        let source = Box::new(MemorySource::new(512));
        let pager = Pager::create(source, Box::new(NoopTransform), 512, 50).unwrap();
        init_empty_database(&pager).unwrap();
        pager
    }

    fn signed_info(signer: &HmacSigner, agent_id: &str) -> AgentInfo {
        let mut info = AgentInfo {
            agent_id: agent_id.to_owned(),
            class: 2,
            public_key: signer.public_key(),
            authority_ceiling: 5,
            write_scope: "orders.*".to_owned(),
            read_scope: "*".to_owned(),
            validity_start: 0,
            validity_end: 9_999_999_999,
            parent_agent: None,
            co_sign_required: true,
            signature: Vec::new(),
            algorithm: Algorithm::Hmac,
        };
        info.signature = signer.sign(&canonical_buffer(&info));
        info
    }

    #[test]
    fn test_register_then_get_agent() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let agents_root = txn
            .create_table(
                "_sharc_agents",
                "CREATE TABLE _sharc_agents (AgentId TEXT PRIMARY KEY, Class INTEGER, PublicKey BLOB, AuthorityCeiling INTEGER, WriteScope TEXT, ReadScope TEXT, ValidityStart INTEGER, ValidityEnd INTEGER, ParentAgent TEXT, CoSignRequired INTEGER, Signature BLOB, Algorithm INTEGER)",
            )
            .unwrap();

        let signer = HmacSigner::new(b"agent-secret".to_vec());
        let registry = AgentRegistry::new(agents_root);
        let info = signed_info(&signer, "agent-1");
        registry.register_agent(&mut txn, info.clone()).unwrap();
        txn.commit().unwrap();

        let txn = Transaction::begin(&pager);
        let fetched = registry.get_agent(&txn, "agent-1").unwrap();
        assert_eq!(fetched, info);
    }

    #[test]
    fn test_register_rejects_bad_signature() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let agents_root = txn
            .create_table(
                "_sharc_agents",
                "CREATE TABLE _sharc_agents (AgentId TEXT PRIMARY KEY, Class INTEGER, PublicKey BLOB, AuthorityCeiling INTEGER, WriteScope TEXT, ReadScope TEXT, ValidityStart INTEGER, ValidityEnd INTEGER, ParentAgent TEXT, CoSignRequired INTEGER, Signature BLOB, Algorithm INTEGER)",
            )
            .unwrap();

        let signer = HmacSigner::new(b"agent-secret".to_vec());
        let registry = AgentRegistry::new(agents_root);
        let mut info = signed_info(&signer, "agent-1");
        info.authority_ceiling = 99; // mutated after signing

        assert!(matches!(registry.register_agent(&mut txn, info), Err(Error::InvalidSignature)));
    }

    #[test]
    fn test_upsert_overwrites_existing_agent() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let agents_root = txn
            .create_table(
                "_sharc_agents",
                "CREATE TABLE _sharc_agents (AgentId TEXT PRIMARY KEY, Class INTEGER, PublicKey BLOB, AuthorityCeiling INTEGER, WriteScope TEXT, ReadScope TEXT, ValidityStart INTEGER, ValidityEnd INTEGER, ParentAgent TEXT, CoSignRequired INTEGER, Signature BLOB, Algorithm INTEGER)",
            )
            .unwrap();

        let signer = HmacSigner::new(b"agent-secret".to_vec());
        let registry = AgentRegistry::new(agents_root);
        registry.register_agent(&mut txn, signed_info(&signer, "agent-1")).unwrap();

        let mut updated = signed_info(&signer, "agent-1");
        updated.authority_ceiling = 7;
        updated.signature = signer.sign(&canonical_buffer(&updated));
        registry.register_agent(&mut txn, updated.clone()).unwrap();
        txn.commit().unwrap();

        let txn = Transaction::begin(&pager);
        let fetched = registry.get_agent(&txn, "agent-1").unwrap();
        assert_eq!(fetched.authority_ceiling, 7);
    }
}
