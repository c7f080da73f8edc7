use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tempfile::NamedTempFile;
use crate::config::defs::{PipelineError, GZIP_EXT, VCF_EXT};


pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Compression is judged by the conventional `.gz` suffix, not by content.
pub fn has_gz_suffix(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == GZIP_EXT)
}


/// Enum to hold either a plain or gzipped reader
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(BufReader<MultiGzDecoder<File>>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(reader) => reader.read(buf),
            FileReader::Gzipped(reader) => reader.read(buf),
        }
    }
}

impl BufRead for FileReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            FileReader::Uncompressed(reader) => reader.fill_buf(),
            FileReader::Gzipped(reader) => reader.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            FileReader::Uncompressed(reader) => reader.consume(amt),
            FileReader::Gzipped(reader) => reader.consume(amt),
        }
    }
}

/// Opens a text file, transparently decompressing gzip/BGZF content.
pub fn open_text_reader(path: &Path) -> io::Result<FileReader> {
    let gzipped = is_gzipped(path)?;
    let file = File::open(path)?;
    if gzipped {
        Ok(FileReader::Gzipped(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(FileReader::Uncompressed(BufReader::new(file)))
    }
}

/// First line of the (decompressed) content, without the line terminator.
/// `None` for an empty file.
pub fn read_first_line(path: &Path) -> io::Result<Option<String>> {
    let mut reader = open_text_reader(path)?;
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

/// Counts data records, i.e. non-empty lines not starting with `#`.
/// Works on raw bytes, so records with non-UTF-8 IDs or INFO values still count.
pub fn count_records(path: &Path) -> io::Result<u64> {
    let mut reader = open_text_reader(path)?;
    let mut line = Vec::new();
    let mut counter = 0;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        match line.first() {
            Some(b'#') | Some(b'\n') | Some(b'\r') | None => {}
            Some(_) => counter += 1,
        }
    }
    Ok(counter)
}


/// Splits a file name into stem and trailing extensions (`a.vcf.gz` -> `a`, [`vcf`, `gz`]).
/// At most two extensions are stripped, and only a `.gz` may be followed by another.
pub fn extension_remover(path: &Path) -> (PathBuf, Vec<String>) {
    let mut stem = path.to_path_buf();
    let mut extensions = Vec::new();

    if let Some(ext) = stem.extension().map(|e| e.to_string_lossy().into_owned()) {
        stem.set_extension("");
        let compressed = ext == GZIP_EXT;
        extensions.push(ext);
        if compressed {
            if let Some(inner) = stem.extension().map(|e| e.to_string_lossy().into_owned()) {
                stem.set_extension("");
                extensions.insert(0, inner);
            }
        }
    }
    (stem, extensions)
}

/// Base name used for every artifact derived from `path`:
/// `input_vcf/sample1.vcf.gz` and `elsewhere/sample1.vcf` both yield `sample1`.
pub fn sample_base(path: &Path) -> String {
    let (stem, _) = extension_remover(path);
    stem.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string())
}

/// Builds `<dir>/<prefix><delimiter><base><delimiter><suffix>`, skipping absent parts.
///
/// # Arguments
///
/// * `base` - Base name or path (only the final component is used when `dir` is given).
/// * `dir` - Optional directory to place the file in.
/// * `prefix` - Optional prefix.
/// * `suffix` - Optional suffix, e.g. `filtered.vcf.gz`.
/// * `delimiter` - Joiner between parts.
///
/// # Returns
/// PathBuf of the composed name.
pub fn file_path_manipulator(
    base: &Path,
    dir: Option<&Path>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    delimiter: &str,
) -> PathBuf {
    let base_name = match dir {
        Some(_) => base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        None => base.to_string_lossy().into_owned(),
    };

    let mut name = String::new();
    if let Some(prefix) = prefix {
        name.push_str(prefix);
        name.push_str(delimiter);
    }
    name.push_str(&base_name);
    if let Some(suffix) = suffix {
        name.push_str(delimiter);
        name.push_str(suffix);
    }

    match dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// `<dir>/<base>_<stage>.vcf.gz`
pub fn stage_artifact_path(dir: &Path, base: &str, stage_suffix: &str) -> PathBuf {
    file_path_manipulator(
        Path::new(base),
        Some(dir),
        None,
        Some(&format!("{}.{}.{}", stage_suffix, VCF_EXT, GZIP_EXT)),
        "_",
    )
}

/// Tabix index written next to a compressed VCF.
pub fn index_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tbi");
    PathBuf::from(name)
}


/// Lists `*.vcf` then `*.vcf.gz` regular files in `dir`, each group sorted by name.
pub fn discover_vcf_inputs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut plain = Vec::new();
    let mut compressed = Vec::new();

    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if name.ends_with(&format!(".{}", VCF_EXT)) {
            plain.push(path);
        } else if name.ends_with(&format!(".{}.{}", VCF_EXT, GZIP_EXT)) {
            compressed.push(path);
        }
    }

    plain.sort();
    compressed.sort();
    plain.extend(compressed);
    Ok(plain)
}

/// Files in `dir` whose name ends with `suffix`, sorted.
pub fn files_with_suffix(dir: &Path, suffix: &str) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !dir.is_dir() {
        return Ok(found);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file()
            && path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(suffix))
        {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}


/// Removes everything inside `dir` but keeps the directory itself.
pub fn clear_dir_contents(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    if !dir.is_dir() {
        return Ok(removed);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// Creates `dir` if needed and proves it is writable by creating a throwaway file in it.
pub fn ensure_writable_dir(dir: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(dir).map_err(|e| {
        PipelineError::PermissionDenied(format!("cannot create {}: {}", dir.display(), e))
    })?;
    NamedTempFile::new_in(dir).map_err(|e| {
        PipelineError::PermissionDenied(format!("cannot write to {}: {}", dir.display(), e))
    })?;
    Ok(())
}
