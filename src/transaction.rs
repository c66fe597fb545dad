//! Transactions: identity, coinbase issuance, trimmed-copy ECDSA signing and verification

use crate::constants::*;
use crate::error::{NodeError, Result};
use crate::merkle::sha256_hash;
use crate::types::*;
use crate::utxo::UtxoSet;
use crate::wallet::{self, Wallet};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey};
use rand::RngCore;
use std::collections::HashMap;

/// Referenced transactions keyed by hex transaction id
pub type PrevTransactions = HashMap<String, Transaction>;

impl Transaction {
    /// Exactly one input with an empty reference and index -1
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == -1
    }

    /// SHA256(serialize(tx with id and input signatures cleared))
    ///
    /// The id is assigned before signing, so signatures are never part of it.
    pub fn hash(&self) -> Result<ByteString> {
        let mut copy = self.clone();
        copy.id = Vec::new();
        for input in &mut copy.vin {
            input.signature = Vec::new();
        }
        Ok(sha256_hash(&serialize(&copy)?).to_vec())
    }

    /// Copy with every input's signature and public key cleared
    pub fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: self.id.clone(),
            vin: self
                .vin
                .iter()
                .map(|input| TxInput {
                    txid: input.txid.clone(),
                    vout: input.vout,
                    signature: Vec::new(),
                    pub_key: Vec::new(),
                })
                .collect(),
            vout: self.vout.clone(),
        }
    }

    /// Sign: 𝒯𝒳 × 𝕂 × (ℍ → 𝒯𝒳) → 𝒯𝒳
    ///
    /// For each input i of the trimmed copy c:
    /// 1. c.vin[i].pub_key = referenced output's locking hash
    /// 2. vin[i].signature = r ‖ s of ECDSA-P256(hex(c))
    /// 3. c.vin[i].pub_key = ∅
    pub fn sign(&mut self, key: &SigningKey, prev_txs: &PrevTransactions) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        self.check_references(prev_txs)?;

        let mut copy = self.trimmed_copy();
        for index in 0..copy.vin.len() {
            let locking_hash = referenced_output(&copy.vin[index], prev_txs)?.pub_key_hash.clone();
            copy.vin[index].signature = Vec::new();
            copy.vin[index].pub_key = locking_hash;

            let payload = signing_payload(&copy)?;
            let signature: Signature = key.sign(payload.as_bytes());
            self.vin[index].signature = signature.to_bytes().to_vec();

            copy.vin[index].pub_key = Vec::new();
        }

        Ok(())
    }

    /// Verify: 𝒯𝒳 × (ℍ → 𝒯𝒳) → {true, false}
    ///
    /// True for coinbase. Otherwise every input must:
    /// 1. carry a public key hashing to the referenced output's locking hash
    /// 2. carry a valid ECDSA-P256 signature over the same per-input payload `sign` used
    ///
    /// and the outputs must not exceed the referenced input values.
    pub fn verify(&self, prev_txs: &PrevTransactions) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        self.check_references(prev_txs)?;

        let mut copy = self.trimmed_copy();
        let mut total_in: Amount = 0;

        for (index, input) in self.vin.iter().enumerate() {
            let referenced = referenced_output(input, prev_txs)?;
            total_in += referenced.value;

            if !referenced.is_locked_with_key(&wallet::hash_pub_key(&input.pub_key)) {
                return Ok(false);
            }

            copy.vin[index].signature = Vec::new();
            copy.vin[index].pub_key = referenced.pub_key_hash.clone();
            let payload = signing_payload(&copy)?;
            copy.vin[index].pub_key = Vec::new();

            let key = match wallet::verifying_key_from_raw(&input.pub_key) {
                Ok(key) => key,
                Err(_) => return Ok(false),
            };
            let signature = match Signature::from_slice(&input.signature) {
                Ok(signature) => signature,
                Err(_) => return Ok(false),
            };
            if key.verify(payload.as_bytes(), &signature).is_err() {
                return Ok(false);
            }
        }

        let total_out: Amount = self.vout.iter().map(|o| o.value).sum();
        if self.vout.iter().any(|o| o.value < 0) || total_out > total_in {
            return Ok(false);
        }

        Ok(true)
    }

    fn check_references(&self, prev_txs: &PrevTransactions) -> Result<()> {
        for input in &self.vin {
            let key = hex::encode(&input.txid);
            if !prev_txs.contains_key(&key) {
                return Err(NodeError::MissingReferencedTransaction(key));
            }
        }
        Ok(())
    }
}

/// NewCoinbase: 𝔸 × 𝕊 → 𝒯𝒳
///
/// Empty `data` is replaced with 20 random bytes (hex) so identical rewards get distinct ids.
pub fn new_coinbase(to: &str, data: &str) -> Result<Transaction> {
    let data = if data.is_empty() {
        let mut random = [0u8; COINBASE_RANDOM_BYTES];
        rand::thread_rng().fill_bytes(&mut random);
        hex::encode(random)
    } else {
        data.to_string()
    };

    let input = TxInput {
        txid: Vec::new(),
        vout: -1,
        signature: Vec::new(),
        pub_key: data.into_bytes(),
    };

    let mut tx = Transaction {
        id: Vec::new(),
        vin: vec![input],
        vout: vec![new_output(SUBSIDY, to)?],
    };
    tx.id = tx.hash()?;
    Ok(tx)
}

/// Output of `value` locked to the public-key hash behind `address`
pub fn new_output(value: Amount, address: &str) -> Result<TxOutput> {
    Ok(TxOutput {
        value,
        pub_key_hash: wallet::decode_address(address)?,
    })
}

/// NewTransaction: 𝒲 × 𝔸 × ℤ × 𝒰𝒮 → 𝒯𝒳
///
/// 1. Select spendable outputs of the sender totalling ≥ amount (first fit)
/// 2. One input per selected output
/// 3. One output of `amount` to `to`, plus change back to the sender if any
/// 4. Assign the id, then sign against the referenced transactions in the ledger
pub fn new_utxo_transaction(
    wallet: &Wallet,
    to: &str,
    amount: Amount,
    utxo_set: &UtxoSet,
) -> Result<Transaction> {
    if amount <= 0 {
        return Err(NodeError::InvalidTransaction(format!("amount must be positive, got {}", amount)));
    }
    let recipient = new_output(amount, to)?;

    let pub_key_hash = wallet.pub_key_hash();
    let (accumulated, spendable) = utxo_set.find_spendable_outputs(&pub_key_hash, amount)?;
    if accumulated < amount {
        return Err(NodeError::InsufficientFunds {
            available: accumulated,
            required: amount,
        });
    }

    let mut inputs = Vec::new();
    for (txid, outs) in &spendable {
        let txid = hex::decode(txid).map_err(|e| NodeError::UtxoNotFound(e.to_string()))?;
        for &out_index in outs {
            inputs.push(TxInput {
                txid: txid.clone(),
                vout: out_index,
                signature: Vec::new(),
                pub_key: wallet.public_key().to_vec(),
            });
        }
    }

    let mut outputs = vec![recipient];
    if accumulated > amount {
        outputs.push(TxOutput {
            value: accumulated - amount,
            pub_key_hash,
        });
    }

    let mut tx = Transaction {
        id: Vec::new(),
        vin: inputs,
        vout: outputs,
    };
    tx.id = tx.hash()?;
    utxo_set.blockchain().sign_transaction(&mut tx, wallet.signing_key())?;

    Ok(tx)
}

pub fn serialize(tx: &Transaction) -> Result<ByteString> {
    Ok(bincode::serialize(tx)?)
}

pub fn deserialize(data: &[u8]) -> Result<Transaction> {
    Ok(bincode::deserialize(data)?)
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Hex rendering of the serialized trimmed copy
fn signing_payload(copy: &Transaction) -> Result<String> {
    Ok(hex::encode(serialize(copy)?))
}

fn referenced_output<'a>(input: &TxInput, prev_txs: &'a PrevTransactions) -> Result<&'a TxOutput> {
    let key = hex::encode(&input.txid);
    let prev = prev_txs
        .get(&key)
        .ok_or_else(|| NodeError::MissingReferencedTransaction(key.clone()))?;
    usize::try_from(input.vout)
        .ok()
        .and_then(|i| prev.vout.get(i))
        .ok_or_else(|| NodeError::MissingReferencedTransaction(format!("{}:{}", key, input.vout)))
}
