//! Protocolo ASCII do controlador (família Vision).
//!
//! Formato do frame de requisição:
//!
//! ```text
//! ┌─────────────┬──────────────────────────┬──────────┬─────────┐
//! │ Preâmb. (6) │ Comando ASCII (/00…)     │ CRC (2)  │ ETX (1) │
//! └─────────────┴──────────────────────────┴──────────┴─────────┘
//! ```
//!
//! - O preâmbulo é opaco e varia por comando
//! - O CRC é a soma dos bytes do comando após o `/`, módulo 256,
//!   em hexadecimal maiúsculo com dois dígitos
//! - ETX é `\r`
//!
//! A resposta de "ler todos os floats" traz, após o marcador `RN`, palavras
//! de 4 dígitos hex. Cada float ocupa duas palavras em ordem trocada
//! (word-swapped): `AAAA BBBB` representa o big-endian `BBBBAAAA`.

use crate::types::{CHANNEL_COUNT, Channels};

/// Terminador de mensagem.
pub const TERMINATOR: u8 = b'\r';

/// Marcador que precede o dump de registradores float.
pub const FLOAT_MARKER: &str = "RN";

/// Tamanho de uma palavra hex no dump.
const WORD_LEN: usize = 4;

/// Palavras necessárias para os 24 floats.
const WORDS_NEEDED: usize = CHANNEL_COUNT * 2;

/// Erros de decodificação de resposta.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Marcador {FLOAT_MARKER:?} ausente na resposta")]
    MissingMarker,

    #[error("Floats insuficientes: {0} (esperado {CHANNEL_COUNT})")]
    Insufficient(usize),

    #[error("Palavra hex inválida na posição {0}")]
    InvalidHex(usize),
}

/// Comandos suportados pelo driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Identificação do controlador
    Identify,
    /// Leitura do relógio
    ReadClock,
    /// Leitura dos 24 registradores float a partir do endereço 0
    ReadAllFloats,
}

impl Command {
    pub fn preamble(self) -> [u8; 6] {
        match self {
            Command::Identify => [0xD7, 0x73, 0x65, 0x00, 0x08, 0x00],
            Command::ReadClock => [0xD8, 0x73, 0x65, 0x00, 0x08, 0x00],
            Command::ReadAllFloats => [0xD6, 0x73, 0x65, 0x00, 0x08, 0x00],
        }
    }

    pub fn token(self) -> &'static [u8] {
        match self {
            Command::Identify => b"/00ID",
            Command::ReadClock => b"/00RC",
            Command::ReadAllFloats => b"/00RNF000018",
        }
    }

    /// Frame completo pronto para envio.
    pub fn frame(self) -> Vec<u8> {
        build_frame(&self.preamble(), self.token())
    }
}

/// Checksum de uma mensagem: soma dos bytes após o primeiro, mod 256.
///
/// Retorna dois dígitos hex maiúsculos, sem prefixo `0x`.
pub fn checksum(message: &[u8]) -> String {
    let sum = message
        .iter()
        .skip(1)
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    format!("{sum:02X}")
}

/// Monta `[preâmbulo][comando][CRC][ETX]`.
pub fn build_frame(preamble: &[u8], message: &[u8]) -> Vec<u8> {
    let cs = checksum(message);
    let mut frame = Vec::with_capacity(preamble.len() + message.len() + cs.len() + 1);
    frame.extend_from_slice(preamble);
    frame.extend_from_slice(message);
    frame.extend_from_slice(cs.as_bytes());
    frame.push(TERMINATOR);
    frame
}

/// Converte os bytes recebidos em texto, um caractere por byte.
///
/// Bytes não-ASCII são preservados e barras invertidas ficam literais.
pub fn response_text(raw: &[u8]) -> String {
    raw.iter().map(|&b| char::from(b)).collect()
}

/// Segmento da resposta após a primeira ocorrência do marcador `RN`.
pub fn float_dump(response: &str) -> Result<&str, ProtocolError> {
    response
        .split(FLOAT_MARKER)
        .nth(1)
        .ok_or(ProtocolError::MissingMarker)
}

fn parse_word(word: &[u8], position: usize) -> Result<u32, ProtocolError> {
    std::str::from_utf8(word)
        .ok()
        .and_then(|s| u16::from_str_radix(s, 16).ok())
        .map(u32::from)
        .ok_or(ProtocolError::InvalidHex(position))
}

/// Reconstrói um float a partir de duas palavras na ordem do fio.
fn word_swapped_f32(first: u32, second: u32) -> f32 {
    f32::from_bits((second << 16) | first)
}

/// Decodifica todas as palavras completas do dump em floats.
///
/// `N` palavras produzem `N / 2` floats; a palavra ímpar que sobra é
/// descartada.
pub fn decode_float_dump(dump: &str) -> Result<Vec<f32>, ProtocolError> {
    decode_words(dump.as_bytes())
}

/// Divide em palavras de 4 caracteres; uma palavra final incompleta
/// (checksum + ETX da resposta) é descartada.
fn decode_words(dump: &[u8]) -> Result<Vec<f32>, ProtocolError> {
    let words: Vec<&[u8]> = dump.chunks_exact(WORD_LEN).collect();
    words
        .chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| {
            let first = parse_word(pair[0], 2 * i)?;
            let second = parse_word(pair[1], 2 * i + 1)?;
            Ok(word_swapped_f32(first, second))
        })
        .collect()
}

/// Decodifica a resposta de [`Command::ReadAllFloats`] nos 24 canais.
///
/// Apenas as 48 primeiras palavras são consideradas; o que vier depois
/// (checksum, terminador) é ignorado.
pub fn decode_all_floats(response: &str) -> Result<Channels, ProtocolError> {
    let dump = float_dump(response)?;
    let available = dump.len() / WORD_LEN;
    if available < WORDS_NEEDED {
        return Err(ProtocolError::Insufficient(available / 2));
    }

    let floats = decode_words(&dump.as_bytes()[..WORDS_NEEDED * WORD_LEN])?;
    Channels::from_slice(&floats).ok_or(ProtocolError::Insufficient(floats.len()))
}

/// Codifica floats no formato do dump (usado por simuladores e testes).
pub fn encode_float_dump(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| {
            let bits = v.to_bits();
            format!("{:04X}{:04X}", bits & 0xFFFF, bits >> 16)
        })
        .collect()
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
