use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use kora_core::error::KoraRentError;
use kora_core::types::Pubkey;
use kora_crypto::OperatorKeypair;

/// One lamport sweep inside a reclaim transaction.
#[derive(Debug, Clone)]
pub struct TransferOut {
    pub source: Pubkey,
    pub lamports: u64,
}

/// A signed, wire-encoded transaction ready for submission.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub wire_base64: String,
    /// Base58 of the fee payer's signature — the transaction's id.
    pub signature_b58: String,
    pub total_lamports: u128,
}

/// System program transfer instruction tag (little-endian u32 discriminant).
const SYSTEM_TRANSFER_TAG: u32 = 2;

/// Build and sign a sweep: one system-program transfer per source account,
/// each moving its verified balance to the operator. The operator is the
/// single required signer and fee payer; sources are writable non-signers.
///
/// Legacy wire layout: shortvec(signatures) || message, where message =
/// header || shortvec(account_keys) || recent_blockhash ||
/// shortvec(compiled_instructions). The recent blockhash binds the
/// transaction to a narrow submission window, which is what makes a lost
/// confirmation unreplayable.
pub fn build_sweep_transaction(
    operator: &OperatorKeypair,
    transfers: &[TransferOut],
    recent_blockhash_b58: &str,
) -> Result<BuiltTransaction, KoraRentError> {
    if transfers.is_empty() {
        return Err(KoraRentError::Submit("empty transfer batch".into()));
    }
    let blockhash = Pubkey::from_b58(recent_blockhash_b58)
        .map_err(|_| KoraRentError::Submit(format!("bad blockhash {recent_blockhash_b58}")))?;

    // Keys: fee payer, then sources, then the (read-only) system program.
    let operator_pk = operator.pubkey();
    let system_index = (1 + transfers.len()) as u8;

    let mut message = Vec::new();
    // Header: one required signature, no read-only signed keys, one
    // read-only unsigned key (the system program).
    message.push(1u8);
    message.push(0u8);
    message.push(1u8);

    encode_shortvec_len(2 + transfers.len(), &mut message);
    message.extend_from_slice(operator_pk.as_bytes());
    for t in transfers {
        message.extend_from_slice(t.source.as_bytes());
    }
    message.extend_from_slice(&[0u8; 32]); // system program

    message.extend_from_slice(blockhash.as_bytes());

    encode_shortvec_len(transfers.len(), &mut message);
    let mut total: u128 = 0;
    for (i, t) in transfers.iter().enumerate() {
        total += u128::from(t.lamports);
        message.push(system_index);
        // Accounts: [source, destination] — destination is the fee payer.
        encode_shortvec_len(2, &mut message);
        message.push((1 + i) as u8);
        message.push(0u8);
        // Data: u32 LE instruction tag, u64 LE lamports.
        encode_shortvec_len(12, &mut message);
        message.extend_from_slice(&SYSTEM_TRANSFER_TAG.to_le_bytes());
        message.extend_from_slice(&t.lamports.to_le_bytes());
    }

    let signature = operator.sign_raw(&message);

    let mut wire = Vec::with_capacity(1 + 64 + message.len());
    encode_shortvec_len(1, &mut wire);
    wire.extend_from_slice(&signature);
    wire.extend_from_slice(&message);

    Ok(BuiltTransaction {
        wire_base64: BASE64.encode(&wire),
        signature_b58: bs58::encode(&signature).into_string(),
        total_lamports: total,
    })
}

/// Compact length prefix: 7 bits per byte, high bit as continuation.
fn encode_shortvec_len(len: usize, out: &mut Vec<u8>) {
    let mut rem = len;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if rem == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shortvec(len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        encode_shortvec_len(len, &mut out);
        out
    }

    #[test]
    fn shortvec_vectors() {
        assert_eq!(shortvec(0), vec![0x00]);
        assert_eq!(shortvec(5), vec![0x05]);
        assert_eq!(shortvec(0x7f), vec![0x7f]);
        assert_eq!(shortvec(0x80), vec![0x80, 0x01]);
        assert_eq!(shortvec(0x3fff), vec![0xff, 0x7f]);
        assert_eq!(shortvec(0x4000), vec![0x80, 0x80, 0x01]);
    }

    #[test]
    fn sweep_transaction_layout_and_signature() {
        let operator = OperatorKeypair::generate();
        let transfers = vec![
            TransferOut {
                source: Pubkey::from_bytes([1u8; 32]),
                lamports: 2_000_000,
            },
            TransferOut {
                source: Pubkey::from_bytes([2u8; 32]),
                lamports: 500,
            },
        ];
        let blockhash = Pubkey::from_bytes([9u8; 32]).to_b58();
        let built = build_sweep_transaction(&operator, &transfers, &blockhash).unwrap();
        assert_eq!(built.total_lamports, 2_000_500);

        let wire = BASE64.decode(&built.wire_base64).unwrap();
        // One signature, then the message.
        assert_eq!(wire[0], 1);
        let signature = &wire[1..65];
        let message = &wire[65..];
        assert_eq!(
            bs58::encode(signature).into_string(),
            built.signature_b58
        );

        // Header and key count: operator + 2 sources + system program.
        assert_eq!(&message[..3], &[1, 0, 1]);
        assert_eq!(message[3], 4);
        assert_eq!(&message[4..36], operator.pubkey().as_bytes());
        assert_eq!(&message[36..68], &[1u8; 32]);
        assert_eq!(&message[100..132], &[0u8; 32]);

        // The detached signature covers exactly the message bytes.
        use base64::engine::general_purpose::STANDARD;
        let sig_b64 = STANDARD.encode(signature);
        kora_crypto::verify_detached(&operator.pubkey_b58(), message, &sig_b64).unwrap();
    }

    #[test]
    fn transfer_instruction_data_is_tag_then_lamports() {
        let operator = OperatorKeypair::generate();
        let transfers = vec![TransferOut {
            source: Pubkey::from_bytes([1u8; 32]),
            lamports: 42,
        }];
        let blockhash = Pubkey::from_bytes([9u8; 32]).to_b58();
        let built = build_sweep_transaction(&operator, &transfers, &blockhash).unwrap();
        let wire = BASE64.decode(&built.wire_base64).unwrap();
        let message = &wire[65..];
        // header(3) + len(1) + keys(3*32) + blockhash(32) = 132; then
        // instruction count, program index, account metas, data.
        let ix = &message[132..];
        assert_eq!(ix[0], 1); // one instruction
        assert_eq!(ix[1], 2); // system program index
        assert_eq!(&ix[2..5], &[2, 1, 0]); // two accounts: source, operator
        assert_eq!(ix[5], 12); // data length
        assert_eq!(&ix[6..10], &2u32.to_le_bytes());
        assert_eq!(&ix[10..18], &42u64.to_le_bytes());
    }

    #[test]
    fn empty_batch_is_rejected() {
        let operator = OperatorKeypair::generate();
        let blockhash = Pubkey::from_bytes([9u8; 32]).to_b58();
        assert!(build_sweep_transaction(&operator, &[], &blockhash).is_err());
    }
}
