
// reading and writing of everything a training run consumes or produces:
// dense matrices, vocabularies, token files, assignment checkpoints and the corpus cache.

use crate::config::SnapshotLayout;
use crate::corpus::{CorpusIndex, NounId, VerbId, Vocabulary};
use crate::error::{LdaError, Result};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use ndarray::Array2;
use ndarray_npy::{read_npy, write_npy};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub fn read_input<R: ReadFile>(file_path: &Path) -> Result<R> {
    R::read_file(file_path)
}

pub fn save_output<S: SaveFile + ?Sized>(output_dir: &Path, file_name: &str, item: &S) -> Result<PathBuf> {

    // create output folder
    fs::create_dir_all(output_dir)?;

    let out = output_dir.join(file_name);
    item.save_file(&out)?;
    Ok(out)
}

/// Writes through a sibling temporary path which is renamed onto `path` only after `write`
/// succeeded, so a failed write never leaves a partial file where loaders look.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let mut tmp_name: OsString = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    match write(&tmp) {
        Ok(()) => {
            fs::rename(&tmp, path)?;
            debug!("wrote {}", path.display());
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

pub trait ReadFile: Sized {
    fn read_file(file_path: &Path) -> Result<Self>;
}

pub trait SaveFile {
    fn save_file(&self, file_path: &Path) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MatrixEncoding {
    Text,
    GzText,
    Npy,
}

impl MatrixEncoding {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("npy") => MatrixEncoding::Npy,
            Some("gz") => MatrixEncoding::GzText,
            _ => MatrixEncoding::Text,
        }
    }
}

fn write_matrix_text<W: Write>(writer: &mut W, matrix: &Array2<f64>) -> std::io::Result<()> {
    for row in matrix.rows() {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                writer.write_all(b"\t")?;
            }
            write!(writer, "{}", value)?;
        }
        writer.write_all(b"\n")?;
    }
    Ok(())
}

fn read_matrix_text<R: BufRead>(reader: R, path: &Path) -> Result<Array2<f64>> {

    let mut values: Vec<f64> = Vec::new();
    let mut cols: Option<usize> = None;
    let mut rows = 0;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let before = values.len();
        for field in line.split('\t') {
            let value: f64 = field.trim().parse().map_err(|_| LdaError::MalformedMatrix {
                path: path.to_path_buf(),
                line: i + 1,
                reason: format!("'{}' is not a number", field),
            })?;
            values.push(value);
        }

        // every row must have the width of the first one
        let width = values.len() - before;
        match cols {
            None => cols = Some(width),
            Some(c) if c != width => {
                return Err(LdaError::MalformedMatrix {
                    path: path.to_path_buf(),
                    line: i + 1,
                    reason: format!("row has {} fields, expected {}", width, c),
                })
            }
            Some(_) => {}
        }
        rows += 1;
    }

    Array2::from_shape_vec((rows, cols.unwrap_or(0)), values).map_err(|e| LdaError::MalformedMatrix {
        path: path.to_path_buf(),
        line: rows,
        reason: e.to_string(),
    })
}

impl ReadFile for Array2<f64> {
    fn read_file(file_path: &Path) -> Result<Self> {
        match MatrixEncoding::of(file_path) {
            MatrixEncoding::Npy => Ok(read_npy(file_path)?),
            MatrixEncoding::GzText => {
                let f = BufReader::new(File::open(file_path)?);
                read_matrix_text(BufReader::new(GzDecoder::new(f)), file_path)
            }
            MatrixEncoding::Text => {
                let f = BufReader::new(File::open(file_path)?);
                read_matrix_text(f, file_path)
            }
        }
    }
}

impl SaveFile for Array2<f64> {
    fn save_file(&self, file_path: &Path) -> Result<()> {
        let encoding = MatrixEncoding::of(file_path);
        write_atomically(file_path, |tmp| {
            match encoding {
                MatrixEncoding::Npy => write_npy(tmp, self)?,
                MatrixEncoding::GzText => {
                    let f = BufWriter::new(File::create(tmp)?);
                    let mut writer = GzEncoder::new(f, Compression::default());
                    write_matrix_text(&mut writer, self)?;
                    writer.finish()?.flush()?;
                }
                MatrixEncoding::Text => {
                    let mut writer = BufWriter::new(File::create(tmp)?);
                    write_matrix_text(&mut writer, self)?;
                    writer.flush()?;
                }
            }
            Ok(())
        })
    }
}

// one token per line, the line number is the id
impl ReadFile for Vocabulary {
    fn read_file(file_path: &Path) -> Result<Self> {
        let f = BufReader::new(File::open(file_path)?);
        let mut tokens = Vec::new();
        for (i, line) in f.lines().enumerate() {
            let line = line?;
            let token = line.trim_end_matches('\r');
            // a skipped line would shift every later id
            if token.is_empty() {
                return Err(LdaError::malformed(i + 1, "blank line in vocabulary"));
            }
            tokens.push(token.to_owned());
        }
        Vocabulary::from_tokens(tokens)
    }
}

impl SaveFile for Vocabulary {
    fn save_file(&self, file_path: &Path) -> Result<()> {
        write_atomically(file_path, |tmp| {
            let mut writer = BufWriter::new(File::create(tmp)?);
            for token in self.tokens() {
                writeln!(writer, "{}", token)?;
            }
            writer.flush()?;
            Ok(())
        })
    }
}

/// Token instances as 0-based `(verb, noun)` ids; stored one-based as `verbId,nounId` lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPairs(pub Vec<(VerbId, NounId)>);

fn parse_one_based(field: &str, line: usize) -> Result<usize> {
    match field.trim().parse::<usize>() {
        Ok(id) if id >= 1 => Ok(id - 1),
        _ => Err(LdaError::malformed(line, format!("'{}' is not a one-based id", field))),
    }
}

impl ReadFile for TokenPairs {
    fn read_file(file_path: &Path) -> Result<Self> {
        let f = BufReader::new(File::open(file_path)?);
        let mut pairs = Vec::new();
        for (i, line) in f.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (v, n) = line
                .split_once(',')
                .ok_or_else(|| LdaError::malformed(i + 1, "expected 'verbId,nounId'"))?;
            pairs.push((parse_one_based(v, i + 1)?, parse_one_based(n, i + 1)?));
        }
        Ok(TokenPairs(pairs))
    }
}

impl SaveFile for TokenPairs {
    fn save_file(&self, file_path: &Path) -> Result<()> {
        write_atomically(file_path, |tmp| {
            let mut writer = BufWriter::new(File::create(tmp)?);
            for (v, n) in &self.0 {
                writeln!(writer, "{},{}", v + 1, n + 1)?;
            }
            writer.flush()?;
            Ok(())
        })
    }
}

/// The Gibbs topic assignment array, one 0-based topic per line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignments(pub Vec<usize>);

impl ReadFile for Assignments {
    fn read_file(file_path: &Path) -> Result<Self> {
        let f = BufReader::new(File::open(file_path)?);
        let mut z = Vec::new();
        for (i, line) in f.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let topic = line
                .parse::<usize>()
                .map_err(|_| LdaError::malformed(i + 1, format!("'{}' is not a topic id", line)))?;
            z.push(topic);
        }
        Ok(Assignments(z))
    }
}

impl SaveFile for [usize] {
    fn save_file(&self, file_path: &Path) -> Result<()> {
        write_atomically(file_path, |tmp| {
            let mut writer = BufWriter::new(File::create(tmp)?);
            for topic in self {
                writeln!(writer, "{}", topic)?;
            }
            writer.flush()?;
            Ok(())
        })
    }
}

impl SaveFile for Assignments {
    fn save_file(&self, file_path: &Path) -> Result<()> {
        self.0.as_slice().save_file(file_path)
    }
}

// binary cache of the ingested corpus, lets a re-run skip the ingestion pass
impl ReadFile for CorpusIndex {
    fn read_file(file_path: &Path) -> Result<Self> {
        let f = BufReader::new(File::open(file_path)?);
        Ok(bincode::deserialize_from(f)?)
    }
}

impl SaveFile for CorpusIndex {
    fn save_file(&self, file_path: &Path) -> Result<()> {
        write_atomically(file_path, |tmp| {
            let mut f = BufWriter::new(File::create(tmp)?);
            bincode::serialize_into(&mut f, self)?;
            f.flush()?;
            Ok(())
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotKind {
    /// raw SVI natural parameters
    Lambda,
    Beta,
    Theta,
}

/// Where engines hand their checkpoints. `iteration` is `None` for the final artifact.
pub trait SnapshotSink {
    fn save_matrix(&mut self, kind: SnapshotKind, iteration: Option<usize>, matrix: &Array2<f64>) -> Result<()>;
    fn save_assignments(&mut self, z: &[usize]) -> Result<()>;
}

/// Writes snapshots into a model directory following a [`SnapshotLayout`].
pub struct SnapshotDir {
    dir: PathBuf,
    layout: SnapshotLayout,
}

impl SnapshotDir {

    pub fn create(dir: &Path, layout: SnapshotLayout) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self { dir: dir.to_path_buf(), layout })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }
}

impl SnapshotSink for SnapshotDir {

    fn save_matrix(&mut self, kind: SnapshotKind, iteration: Option<usize>, matrix: &Array2<f64>) -> Result<()> {
        let name = self.layout.matrix_file(kind, iteration);
        save_output(&self.dir, &name, matrix)?;
        Ok(())
    }

    fn save_assignments(&mut self, z: &[usize]) -> Result<()> {
        save_output(&self.dir, &self.layout.assignments_file(), z)?;
        Ok(())
    }
}

/// Drops every snapshot, for runs that only need the returned artifact.
pub struct DiscardSnapshots;

impl SnapshotSink for DiscardSnapshots {

    fn save_matrix(&mut self, _kind: SnapshotKind, _iteration: Option<usize>, _matrix: &Array2<f64>) -> Result<()> {
        Ok(())
    }

    fn save_assignments(&mut self, _z: &[usize]) -> Result<()> {
        Ok(())
    }
}
