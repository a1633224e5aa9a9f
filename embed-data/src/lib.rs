pub mod sequence_iterator;
pub mod text;
pub mod word_embeddings;
