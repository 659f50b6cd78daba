use ethers::abi::{self, Token};
use sha3::{Digest, Keccak256};

/// Compute the first 4 bytes (function selector) from a signature string, e.g. "transfer(address,uint256)".
pub fn selector_from_signature(signature: &str) -> [u8; 4] {
    let mut keccak = Keccak256::new();
    keccak.update(signature.as_bytes());
    let out = keccak.finalize();
    [out[0], out[1], out[2], out[3]]
}

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut keccak = Keccak256::new();
    keccak.update(bytes);
    keccak.finalize().into()
}

/// Pack a selector and ABI-encoded arguments contiguously into calldata.
pub fn abi_pack(selector: [u8; 4], args: &[Token]) -> Vec<u8> {
    let encoded = abi::encode(args);
    let mut out = Vec::with_capacity(4 + encoded.len());
    out.extend_from_slice(&selector);
    out.extend_from_slice(&encoded);
    out
}

/// Selector + arguments in one call.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    abi_pack(selector_from_signature(signature), args)
}
