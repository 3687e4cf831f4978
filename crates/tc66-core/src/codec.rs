//! Frame encryption and measurement decoding.
//!
//! Responses are encrypted with AES-256 in ECB mode under a key shared by
//! every TC66C unit. There is no IV and no padding: 192 bytes of ciphertext
//! are twelve independent 16-byte blocks.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use tc66_types::{FRAME_LEN, Frame, Reading};

use crate::error::{Error, Result};

/// AES block size in bytes.
const BLOCK_LEN: usize = 16;

#[rustfmt::skip]
const KEY: [u8; 32] = [
    0x58, 0x21, 0xfa, 0x56, 0x01, 0xb2, 0xf0, 0x26,
    0x87, 0xff, 0x12, 0x04, 0x62, 0x2a, 0x4f, 0xb0,
    0x86, 0xf4, 0x02, 0x60, 0x81, 0x6f, 0x9a, 0x0b,
    0xa7, 0xf1, 0x06, 0x61, 0x9a, 0xb8, 0x72, 0x88,
];

fn cipher() -> Aes256 {
    Aes256::new(GenericArray::from_slice(&KEY))
}

/// Decrypt a frame received from the meter.
pub fn decrypt(frame: &Frame) -> Frame {
    let cipher = cipher();
    let mut out = frame.clone();
    for block in out.as_bytes_mut().chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

/// Encrypt a plaintext frame the way the meter does.
pub fn encrypt(frame: &Frame) -> Frame {
    let cipher = cipher();
    let mut out = frame.clone();
    for block in out.as_bytes_mut().chunks_exact_mut(BLOCK_LEN) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

/// Decrypt a frame and extract the measurement fields.
pub fn decode(frame: &Frame) -> Result<Reading> {
    let plaintext = decrypt(frame);
    Ok(Reading::from_plaintext(plaintext.as_bytes())?)
}

/// Decode a raw byte buffer.
///
/// # Errors
///
/// Returns [`Error::Decode`] unless `data` is exactly one frame long.
pub fn decode_bytes(data: &[u8]) -> Result<Reading> {
    let frame = Frame::from_slice(data)
        .map_err(|e| Error::Decode(format!("cannot decrypt {} bytes: {}", data.len(), e)))?;
    decode(&frame)
}

/// Build the encrypted frame a meter would send for `reading`.
///
/// Bytes outside the measurement fields are filled from `filler`.
pub fn encode_with(reading: &Reading, filler: &[u8; FRAME_LEN]) -> Frame {
    let mut plaintext = *filler;
    // Real frames start with a "pac1" block header
    plaintext[..4].copy_from_slice(b"pac1");
    reading.write_plaintext(&mut plaintext);
    encrypt(&Frame::new(plaintext))
}

/// Build the encrypted frame a meter would send for `reading`.
pub fn encode(reading: &Reading) -> Frame {
    encode_with(reading, &[0u8; FRAME_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_inverts_encrypt() {
        let plain: Vec<u8> = (0..FRAME_LEN).map(|i| (i * 7) as u8).collect();
        let frame = Frame::from_slice(&plain).unwrap();
        let cipher = encrypt(&frame);
        assert_ne!(cipher, frame);
        assert_eq!(decrypt(&cipher), frame);
    }

    #[test]
    fn test_ecb_blocks_are_independent() {
        // Identical plaintext blocks produce identical ciphertext blocks
        let frame = Frame::new([0x42; FRAME_LEN]);
        let cipher = encrypt(&frame);
        let blocks: Vec<&[u8]> = cipher.as_bytes().chunks(BLOCK_LEN).collect();
        assert!(blocks.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_known_voltage_fixture() {
        let mut plaintext = [0u8; FRAME_LEN];
        plaintext[48..52].copy_from_slice(&[0xB8, 0x0B, 0x00, 0x00]);
        let frame = encrypt(&Frame::new(plaintext));

        let reading = decode(&frame).unwrap();
        assert_eq!(reading.voltage, 0.3);
        assert_eq!(reading.current, 0.0);
        assert_eq!(reading.power, 0.0);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let frame = encode(&Reading::new(5.1, 0.2, 1.02));
        let first = decode(&frame).unwrap();
        for _ in 0..5 {
            assert_eq!(decode(&frame).unwrap(), first);
        }
    }

    #[test]
    fn test_encode_decode() {
        let reading = Reading::new(5.0832, 0.43561, 2.2143);
        assert_eq!(decode(&encode(&reading)).unwrap(), reading);
    }

    #[test]
    fn test_encode_writes_header() {
        let frame = encode(&Reading::default());
        assert_eq!(&decrypt(&frame).as_bytes()[..4], b"pac1");
    }

    #[test]
    fn test_decode_bytes_rejects_wrong_length() {
        let err = decode_bytes(&[0u8; 190]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().contains("190 bytes"));
    }

    #[test]
    fn test_decode_bytes() {
        let reading = Reading::new(20.0, 3.0, 60.0);
        let frame = encode(&reading);
        assert_eq!(decode_bytes(frame.as_bytes()).unwrap(), reading);
    }
}
