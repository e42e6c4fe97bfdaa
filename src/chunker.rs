//! Troceado de campos de texto en chunks solapados medidos en tokens BPE
//! (`cl100k_base`), la misma unidad para el tier CSV y el tier PDF.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tiktoken_rs::CoreBPE;

use crate::models::{Chunk, SourceTier};

/// Campos con esta longitud o menos (tras `trim`) son ruido: "|", "-", "N/A"...
pub const MIN_FIELD_CHARS: usize = 3;

#[derive(Clone)]
pub struct Chunker {
    bpe: Arc<CoreBPE>,
    chunk_size: usize,
    chunk_overlap: usize,
}

/// Palabra con su coste en tokens y si abre un párrafo nuevo.
struct Unit<'a> {
    word: &'a str,
    tokens: usize,
    paragraph_start: bool,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(anyhow!(
                "Tamaño de chunk inválido: size={chunk_size}, overlap={chunk_overlap}"
            ));
        }
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| anyhow!("No se pudo cargar el tokenizador cl100k_base: {e}"))?;
        Ok(Self {
            bpe: Arc::new(bpe),
            chunk_size,
            chunk_overlap,
        })
    }

    /// Coste en tokens de un texto tal y como lo mide el troceado
    /// (suma de las palabras).
    #[cfg(test)]
    pub fn measure(&self, text: &str) -> usize {
        text.split_whitespace()
            .map(|w| self.bpe.encode_ordinary(w).len())
            .sum()
    }

    /// Trocea todos los campos útiles y etiqueta cada chunk con la entidad y el tier.
    pub fn chunk_fields<'a, I>(&self, fields: I, entity_id: &str, source: SourceTier) -> Vec<Chunk>
    where
        I: IntoIterator<Item = &'a str>,
    {
        fields
            .into_iter()
            .filter(|field| is_useful_field(field))
            .flat_map(|field| self.split(field))
            .map(|text| Chunk {
                text,
                entity_id: entity_id.to_string(),
                source,
            })
            .collect()
    }

    /// Empaqueta palabras (respetando los saltos de párrafo) en ventanas de
    /// como mucho `chunk_size` tokens; cada ventana arrastra hasta
    /// `chunk_overlap` tokens de la anterior. Una palabra mayor que el límite
    /// forma su propio chunk.
    pub fn split(&self, text: &str) -> Vec<String> {
        let units = self.units(text);
        let mut chunks = Vec::new();
        let mut window: VecDeque<&Unit> = VecDeque::new();
        let mut total = 0usize;

        for unit in &units {
            if total + unit.tokens > self.chunk_size && !window.is_empty() {
                chunks.push(join_units(&window));
                while total > self.chunk_overlap
                    || (total + unit.tokens > self.chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some(dropped) => total -= dropped.tokens,
                        None => break,
                    }
                }
            }
            window.push_back(unit);
            total += unit.tokens;
        }
        if !window.is_empty() {
            chunks.push(join_units(&window));
        }
        chunks
    }

    fn units<'a>(&self, text: &'a str) -> Vec<Unit<'a>> {
        let mut units = Vec::new();
        for paragraph in text.split("\n\n") {
            let mut first = true;
            for word in paragraph.split_whitespace() {
                units.push(Unit {
                    word,
                    tokens: self.bpe.encode_ordinary(word).len().max(1),
                    paragraph_start: first,
                });
                first = false;
            }
        }
        units
    }
}

pub fn is_useful_field(field: &str) -> bool {
    field.trim().chars().count() > MIN_FIELD_CHARS
}

fn join_units(window: &VecDeque<&Unit>) -> String {
    let mut out = String::new();
    for (i, unit) in window.iter().enumerate() {
        if i > 0 {
            out.push_str(if unit.paragraph_start { "\n\n" } else { " " });
        }
        out.push_str(unit.word);
    }
    out
}
