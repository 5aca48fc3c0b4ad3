//! Tokens tradeable by the daemon and their ledger encodings

use crate::error::{SwapResult, SwapdError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Token traded in a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Token {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "DGX")]
    Dgx,
    #[serde(rename = "TUSD")]
    Tusd,
    #[serde(rename = "REN")]
    Ren,
    #[serde(rename = "ZRX")]
    Zrx,
    #[serde(rename = "OMG")]
    Omg,
}

impl Token {
    pub const ALL: [Token; 7] = [
        Token::Btc,
        Token::Eth,
        Token::Dgx,
        Token::Tusd,
        Token::Ren,
        Token::Zrx,
        Token::Omg,
    ];

    /// Decode a 32-bit token code as reported by the matching ledger
    pub fn from_code(code: u32) -> SwapResult<Self> {
        Self::ALL
            .into_iter()
            .find(|token| token.code() == code)
            .ok_or(SwapdError::UnknownToken(code))
    }

    /// Ledger token code
    pub fn code(&self) -> u32 {
        match self {
            Token::Btc => 0x0000_0000,
            Token::Eth => 0x0000_0001,
            Token::Dgx => 0x0000_0100,
            Token::Tusd => 0x0000_0101,
            Token::Ren => 0x0001_0000,
            Token::Zrx => 0x0001_0001,
            Token::Omg => 0x0001_0002,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Token::Btc => "BTC",
            Token::Eth => "ETH",
            Token::Dgx => "DGX",
            Token::Tusd => "TUSD",
            Token::Ren => "REN",
            Token::Zrx => "ZRX",
            Token::Omg => "OMG",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
