
// imports
use crate::error::{LdaError, Result};
use crate::files_handling::{self, TokenPairs};

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

pub type VerbId = usize;
pub type NounId = usize;

/// A dense, stable bijection between tokens and `0..len` ids.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    t2i: HashMap<String, usize>,
    i2t: Vec<String>,
}

impl Vocabulary {

    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a vocabulary where the position of each token is its id.
    pub fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        let mut t2i = HashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            if t2i.insert(token.to_owned(), i).is_some() {
                return Err(LdaError::InvalidCorpus(format!("token '{}' appears twice in vocabulary", token)));
            }
        }
        Ok(Self { t2i, i2t: tokens })
    }

    pub fn get_or_insert(&mut self, token: &str) -> usize {
        if let Some(i) = self.t2i.get(token) {
            return *i;
        }
        let i = self.i2t.len();
        self.t2i.insert(token.to_owned(), i);
        self.i2t.push(token.to_owned());
        i
    }

    pub fn id(&self, token: &str) -> Option<usize> {
        self.t2i.get(token).copied()
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.i2t.get(id).map(String::as_str)
    }

    pub fn tokens(&self) -> &[String] {
        &self.i2t
    }

    pub fn len(&self) -> usize {
        self.i2t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.i2t.is_empty()
    }
}

/// Anything that can address an entry of a [`Vocabulary`]: a dense id or the token itself.
pub trait VocabKey {
    fn resolve(&self, vocab: &Vocabulary, kind: &'static str) -> Result<usize>;
}

impl VocabKey for usize {
    fn resolve(&self, vocab: &Vocabulary, kind: &'static str) -> Result<usize> {
        if *self < vocab.len() {
            Ok(*self)
        } else {
            Err(LdaError::NotFound { kind, key: self.to_string() })
        }
    }
}

impl VocabKey for &str {
    fn resolve(&self, vocab: &Vocabulary, kind: &'static str) -> Result<usize> {
        vocab.id(self).ok_or_else(|| LdaError::NotFound { kind, key: self.to_string() })
    }
}

impl VocabKey for &String {
    fn resolve(&self, vocab: &Vocabulary, kind: &'static str) -> Result<usize> {
        self.as_str().resolve(vocab, kind)
    }
}

/// One line of the labelled corpus: `verb \t noun \t frequency \t isPositive`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorpusRecord {
    pub verb: String,
    pub noun: String,
    pub frequency: u64,
    pub positive: bool,
}

impl CorpusRecord {

    pub fn new(verb: &str, noun: &str, frequency: u64, positive: bool) -> Self {
        Self { verb: verb.to_owned(), noun: noun.to_owned(), frequency, positive }
    }

    /// Parses one corpus line, `Ok(None)` for blank lines. `line_no` is 1-based and only used for errors.
    pub fn parse_line(line: &str, line_no: usize) -> Result<Option<CorpusRecord>> {

        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(None);
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 4 {
            return Err(LdaError::malformed(line_no, format!("expected 4 tab separated fields, found {}", fields.len())));
        }

        let verb = fields[0].trim();
        let noun = fields[1].trim();
        if verb.is_empty() || noun.is_empty() {
            return Err(LdaError::malformed(line_no, "empty verb or noun"));
        }

        let frequency: u64 = fields[2].trim().parse()
            .map_err(|_| LdaError::malformed(line_no, format!("frequency '{}' is not an unsigned integer", fields[2])))?;

        let positive = match fields[3].trim() {
            "1" => true,
            "0" => false,
            other => return Err(LdaError::malformed(line_no, format!("label '{}' is neither 0 nor 1", other))),
        };

        if positive && frequency == 0 {
            return Err(LdaError::malformed(line_no, "positive record with zero frequency"));
        }

        Ok(Some(CorpusRecord { verb: verb.to_owned(), noun: noun.to_owned(), frequency, positive }))
    }
}

/// Accumulates positive records into vocabularies and (verb, noun) counts.
#[derive(Default)]
struct CorpusBuilder {
    verbs: Vocabulary,
    nouns: Vocabulary,
    vn_count: HashMap<(VerbId, NounId), u64>,
}

impl CorpusBuilder {

    fn accumulate(&mut self, record: &CorpusRecord) {

        // the polarity label is computed upstream, only positive pairs feed the generative model
        if !record.positive {
            return;
        }

        let verb_id = self.verbs.get_or_insert(&record.verb);
        let noun_id = self.nouns.get_or_insert(&record.noun);
        *self.vn_count.entry((verb_id, noun_id)).or_insert(0) += record.frequency;
    }

    fn build(self) -> Result<CorpusIndex> {
        CorpusIndex::from_counts(self.verbs, self.nouns, self.vn_count)
    }
}

/// Dense ids for verbs and nouns plus, for every verb, its compacted `(noun, frequency)` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorpusIndex {
    verbs: Vocabulary,
    nouns: Vocabulary,
    documents: Vec<Vec<(NounId, u64)>>,
    total_tokens: u64,
}

impl CorpusIndex {

    fn read_file(file_path: &Path) -> Result<Lines<BufReader<File>>> {
        let f = File::open(file_path)?;
        Ok(BufReader::new(f).lines())
    }

    /// Full ingestion pass over a labelled corpus file; aborts on the first malformed line.
    pub fn load(file_path: &Path) -> Result<CorpusIndex> {

        info!("ingesting corpus from {}", file_path.display());
        let mut builder = CorpusBuilder::default();
        for (i, line) in Self::read_file(file_path)?.enumerate() {
            if let Some(record) = CorpusRecord::parse_line(&line?, i + 1)? {
                builder.accumulate(&record);
            }
        }

        let corpus = builder.build()?;
        info!(
            "corpus has {} verbs, {} nouns and {} tokens",
            corpus.verb_count(), corpus.noun_count(), corpus.total_tokens()
        );
        Ok(corpus)
    }

    pub fn from_records<'r, I>(records: I) -> Result<CorpusIndex>
    where
        I: IntoIterator<Item = &'r CorpusRecord>,
    {
        let mut builder = CorpusBuilder::default();
        for record in records {
            builder.accumulate(record);
        }
        builder.build()
    }

    /// Rebuilds a corpus from vocabulary files and a 1-based `verbId,nounId` token file.
    /// Verbs listed in the vocabulary without any token keep an empty document.
    pub fn from_index_files(verbs_path: &Path, nouns_path: &Path, tokens_path: &Path) -> Result<CorpusIndex> {

        let verbs: Vocabulary = files_handling::read_input(verbs_path)?;
        let nouns: Vocabulary = files_handling::read_input(nouns_path)?;
        let pairs: TokenPairs = files_handling::read_input(tokens_path)?;

        let mut vn_count: HashMap<(VerbId, NounId), u64> = HashMap::new();
        for (line, (v, n)) in pairs.0.into_iter().enumerate() {
            if v >= verbs.len() || n >= nouns.len() {
                return Err(LdaError::malformed(
                    line + 1,
                    format!("token ({}, {}) is outside the vocabularies", v + 1, n + 1),
                ));
            }
            *vn_count.entry((v, n)).or_insert(0) += 1;
        }

        Self::from_counts(verbs, nouns, vn_count)
    }

    pub(crate) fn from_counts(verbs: Vocabulary, nouns: Vocabulary, vn_count: HashMap<(VerbId, NounId), u64>) -> Result<CorpusIndex> {

        // compact the counts per verb, nouns ordered by id so runs are reproducible
        let mut documents: Vec<Vec<(NounId, u64)>> = vec![Vec::new(); verbs.len()];
        let mut total_tokens = 0;
        for ((v, n), freq) in vn_count {
            documents[v].push((n, freq));
            total_tokens += freq;
        }
        for document in documents.iter_mut() {
            document.sort_unstable_by_key(|(n, _)| *n);
        }

        Ok(CorpusIndex { verbs, nouns, documents, total_tokens })
    }

    pub fn verbs(&self) -> &Vocabulary {
        &self.verbs
    }

    pub fn nouns(&self) -> &Vocabulary {
        &self.nouns
    }

    pub fn verb_count(&self) -> usize {
        self.verbs.len()
    }

    pub fn noun_count(&self) -> usize {
        self.nouns.len()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn document(&self, verb: VerbId) -> &[(NounId, u64)] {
        &self.documents[verb]
    }

    pub fn documents(&self) -> &[Vec<(NounId, u64)>] {
        &self.documents
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Every token instance, verb-major then noun order, repeated by frequency.
    pub fn tokens(&self) -> impl Iterator<Item = (VerbId, NounId)> + '_ {
        self.documents.iter().enumerate().flat_map(|(v, document)| {
            document
                .iter()
                .flat_map(move |&(n, freq)| std::iter::repeat((v, n)).take(freq as usize))
        })
    }

    pub fn token_count_for_verb(&self, verb: VerbId) -> u64 {
        self.documents[verb].iter().map(|(_, freq)| freq).sum()
    }

    pub fn token_count_for_noun(&self, noun: NounId) -> u64 {
        self.documents
            .iter()
            .flat_map(|document| document.iter())
            .filter(|(n, _)| *n == noun)
            .map(|(_, freq)| freq)
            .sum()
    }

    pub fn token_pairs(&self) -> TokenPairs {
        TokenPairs(self.tokens().collect())
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::files_handling::save_output;

    fn records() -> Vec<CorpusRecord> {
        vec![
            CorpusRecord::new("eat", "apple", 3, true),
            CorpusRecord::new("eat", "bread", 1, true),
            CorpusRecord::new("drink", "water", 4, true),
            CorpusRecord::new("eat", "apple", 2, true),
            CorpusRecord::new("drink", "apple", 9, false),
            CorpusRecord::new("read", "book", 7, false),
        ]
    }

    #[test]
    fn aggregates_positive_pairs() {

        let corpus = CorpusIndex::from_records(&records()).unwrap();

        // ids follow the first appearance of positive records, the negative-only verb is absent
        assert_eq!(corpus.verbs().tokens(), &["eat".to_string(), "drink".to_string()]);
        assert_eq!(corpus.nouns().tokens(), &["apple".to_string(), "bread".to_string(), "water".to_string()]);

        // repeated (eat, apple) collapses into a single pair
        assert_eq!(corpus.document(0), &[(0, 5), (1, 1)]);
        assert_eq!(corpus.document(1), &[(2, 4)]);
        assert_eq!(corpus.total_tokens(), 10);
        assert_eq!(corpus.token_count_for_noun(0), 5);
        assert_eq!(corpus.token_count_for_verb(1), 4);
        assert_eq!(corpus.tokens().count(), 10);
    }

    #[test]
    fn parse_line_rejects_malformed_records() {

        let good = CorpusRecord::parse_line("eat\tapple\t3\t1\r", 1).unwrap().unwrap();
        assert_eq!(good, CorpusRecord::new("eat", "apple", 3, true));
        assert!(CorpusRecord::parse_line("   ", 2).unwrap().is_none());

        for (line, bad) in [
            "eat\tapple\t3",
            "eat\tapple\tthree\t1",
            "eat\tapple\t3\tyes",
            "eat\tapple\t-3\t1",
            "eat\tapple\t0\t1",
            "eat\tapple\t3\t1\textra",
        ].iter().enumerate() {
            match CorpusRecord::parse_line(bad, line + 1) {
                Err(LdaError::MalformedRecord { line: l, .. }) => assert_eq!(l, line + 1),
                other => panic!("expected a malformed record for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn load_aborts_on_malformed_line() {

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.tsv");
        std::fs::write(&path, "eat\tapple\t3\t1\ndrink\twater\n").unwrap();

        match CorpusIndex::load(&path) {
            Err(LdaError::MalformedRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed record, got {:?}", other),
        }
    }

    #[test]
    fn index_files_round_trip() {

        let corpus = CorpusIndex::from_records(&records()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        save_output(dir.path(), "verbIdx.txt", corpus.verbs()).unwrap();
        save_output(dir.path(), "nounIdx.txt", corpus.nouns()).unwrap();
        save_output(dir.path(), "vnIdx.txt", &corpus.token_pairs()).unwrap();

        // the token file is one-based on disk
        let raw = std::fs::read_to_string(dir.path().join("vnIdx.txt")).unwrap();
        assert_eq!(raw.lines().next(), Some("1,1"));
        assert_eq!(raw.lines().last(), Some("2,3"));

        let rebuilt = CorpusIndex::from_index_files(
            &dir.path().join("verbIdx.txt"),
            &dir.path().join("nounIdx.txt"),
            &dir.path().join("vnIdx.txt"),
        ).unwrap();
        assert_eq!(rebuilt, corpus);
    }

    #[test]
    fn verbs_without_tokens_keep_an_empty_document() {

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("verbIdx.txt"), "eat\ndrink\nread\n").unwrap();
        std::fs::write(dir.path().join("nounIdx.txt"), "apple\nwater\n").unwrap();
        std::fs::write(dir.path().join("vnIdx.txt"), "1,1\n2,2\n").unwrap();

        let corpus = CorpusIndex::from_index_files(
            &dir.path().join("verbIdx.txt"),
            &dir.path().join("nounIdx.txt"),
            &dir.path().join("vnIdx.txt"),
        ).unwrap();
        assert_eq!(corpus.document_count(), 3);
        assert_eq!(corpus.document(1), &[(1, 1)]);
        assert!(corpus.document(2).is_empty());
        assert_eq!(corpus.token_count_for_verb(2), 0);
        assert_eq!(corpus.total_tokens(), 2);
    }

    #[test]
    fn token_file_outside_vocabulary_is_rejected() {

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("verbIdx.txt"), "eat\n").unwrap();
        std::fs::write(dir.path().join("nounIdx.txt"), "apple\n").unwrap();
        std::fs::write(dir.path().join("vnIdx.txt"), "1,1\n1,2\n").unwrap();

        let result = CorpusIndex::from_index_files(
            &dir.path().join("verbIdx.txt"),
            &dir.path().join("nounIdx.txt"),
            &dir.path().join("vnIdx.txt"),
        );
        assert!(matches!(result, Err(LdaError::MalformedRecord { line: 2, .. })));
    }
}
