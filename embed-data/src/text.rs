use candle_vae::common_io::read_lines;
use std::collections::HashMap;

///
/// Token <-> index map of a text dataset. Tokens not in the
/// vocabulary map to `unknown_index`.
///
pub struct TextVocabulary {
    vocabulary: HashMap<Box<str>, usize>,
    inverse: Vec<Box<str>>,
    unknown_index: usize,
    case_sensitive: bool,
}

impl TextVocabulary {
    /// * `tokens` - token of each index, in order
    /// * `unknown_index` - index of tokens not in the vocabulary
    /// * `case_sensitive` - otherwise lookups are lower-cased
    pub fn new(tokens: Vec<Box<str>>, unknown_index: usize, case_sensitive: bool) -> Self {
        let vocabulary = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if case_sensitive {
                    (t.clone(), i)
                } else {
                    (t.to_lowercase().into_boxed_str(), i)
                }
            })
            .collect();
        Self {
            vocabulary,
            inverse: tokens,
            unknown_index,
            case_sensitive,
        }
    }

    /// One token per line; the line number is the index
    pub fn from_file(
        file: &str,
        unknown_index: usize,
        case_sensitive: bool,
    ) -> anyhow::Result<Self> {
        let tokens = read_lines(file)?;
        if tokens.is_empty() {
            return Err(anyhow::anyhow!("empty vocabulary file {}", file));
        }
        Ok(Self::new(tokens, unknown_index, case_sensitive))
    }

    pub fn len(&self) -> usize {
        self.inverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inverse.is_empty()
    }

    pub fn unknown_index(&self) -> usize {
        self.unknown_index
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn lookup(&self, token: &str) -> usize {
        let found = if self.case_sensitive {
            self.vocabulary.get(token)
        } else {
            self.vocabulary.get(token.to_lowercase().as_str())
        };
        found.copied().unwrap_or(self.unknown_index)
    }

    pub fn words_to_indices<S: AsRef<str>>(&self, words: &[S]) -> Vec<usize> {
        words.iter().map(|w| self.lookup(w.as_ref())).collect()
    }

    /// Out-of-range indices come back as the unknown token
    pub fn indices_to_words(&self, indices: &[usize]) -> Vec<Box<str>> {
        indices
            .iter()
            .map(|&i| {
                self.inverse
                    .get(i)
                    .or_else(|| self.inverse.get(self.unknown_index))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn chars_to_indices(&self, text: &str) -> Vec<usize> {
        text.chars()
            .map(|c| self.lookup(c.encode_utf8(&mut [0; 4])))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(case_sensitive: bool) -> TextVocabulary {
        let tokens = ["<unk>", "a", "b", "C"]
            .iter()
            .map(|s| Box::from(*s))
            .collect();
        TextVocabulary::new(tokens, 0, case_sensitive)
    }

    #[test]
    fn unknown_tokens_map_to_zero() {
        let v = vocab(true);
        assert_eq!(v.words_to_indices(&["a", "zzz", "C"]), vec![1, 0, 3]);
        assert_eq!(v.chars_to_indices("abxC"), vec![1, 2, 0, 3]);
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn case_handling() {
        let v = vocab(true);
        assert_eq!(v.chars_to_indices("A"), vec![0]);
        let v = vocab(false);
        assert_eq!(v.chars_to_indices("Ac"), vec![1, 3]);
    }

    #[test]
    fn inverse_lookup() {
        let v = vocab(true);
        let words = v.indices_to_words(&[2, 1, 99]);
        assert_eq!(
            words.iter().map(|w| w.as_ref()).collect::<Vec<_>>(),
            vec!["b", "a", "<unk>"]
        );
    }
}
