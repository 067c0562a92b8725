//! Adapters turning files on disk into a [`Dataset`].
use crate::backend::Backend;
use crate::data::{ArrayData, DataFrameIndex};
use crate::dataset::Dataset;

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use log::debug;
use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};
use polars::prelude::{DataFrame, NamedFrom, Series};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Input formats accepted by the file ingestion entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// An annotated data matrix in the backend's native container.
    AnnData,
    /// A 10x Genomics feature-barcode matrix directory in Matrix Market format.
    TenX,
}

impl FromStr for FileFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "anndata" | "zarr" => Ok(FileFormat::AnnData),
            "h5ad" => bail!("h5ad files are not supported, convert to AnnData Zarr first"),
            "10x" | "tenx" | "mtx" => Ok(FileFormat::TenX),
            _ => bail!("unknown file format: {}", s),
        }
    }
}

/// Read `path` in the given format.
pub fn read_dataset<B: Backend, P: AsRef<Path>>(path: P, format: FileFormat) -> Result<Dataset> {
    let path = path.as_ref();
    match format {
        FileFormat::AnnData => {
            B::read_anndata(path).with_context(|| format!("cannot read {}", path.display()))
        }
        FileFormat::TenX => read_10x_mtx(path),
    }
}

fn open_file<P: AsRef<Path>>(file: P) -> Result<Box<dyn BufRead>> {
    fn is_gzipped<P: AsRef<Path>>(file: P) -> Result<bool> {
        Ok(MultiGzDecoder::new(File::open(file)?).header().is_some())
    }

    let reader: Box<dyn BufRead> = if is_gzipped(&file)? {
        Box::new(BufReader::new(MultiGzDecoder::new(File::open(file)?)))
    } else {
        Box::new(BufReader::new(File::open(file)?))
    };
    Ok(reader)
}

/// Locate `name` or `name.gz` inside `dir`.
fn find_file(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    names
        .iter()
        .flat_map(|name| [dir.join(name), dir.join(format!("{}.gz", name))])
        .find(|p| p.is_file())
}

/// Tab-separated rows with at least one field.
fn read_tsv<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<String>>> {
    open_file(path)?
        .lines()
        .filter(|line| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
        .map(|line| Ok(line?.split('\t').map(|x| x.trim_end().to_string()).collect()))
        .collect()
}

/// Read a 10x Genomics matrix directory holding `matrix.mtx`, `barcodes.tsv` and either
/// `features.tsv` or `genes.tsv`, each optionally gzipped.
///
/// The matrix is stored genes by cells and is transposed to cells by genes. Variables are
/// named by gene symbol; `gene_ids` and, when available, `feature_types` become the var table.
pub fn read_10x_mtx<P: AsRef<Path>>(dir: P) -> Result<Dataset> {
    let dir = dir.as_ref();
    let missing = |what: &str| format!("no {} file in {}", what, dir.display());
    let matrix_path = find_file(dir, &["matrix.mtx"]).with_context(|| missing("matrix.mtx"))?;
    let barcodes_path =
        find_file(dir, &["barcodes.tsv"]).with_context(|| missing("barcodes.tsv"))?;
    let features_path = find_file(dir, &["features.tsv", "genes.tsv"])
        .with_context(|| missing("features.tsv or genes.tsv"))?;
    debug!("Reading 10x matrix from {}", matrix_path.display());

    let coo = read_matrix_market(&mut open_file(&matrix_path)?)
        .with_context(|| format!("cannot parse {}", matrix_path.display()))?;
    let cells_by_genes = CooMatrix::try_from_triplets(
        coo.ncols(),
        coo.nrows(),
        coo.col_indices().to_vec(),
        coo.row_indices().to_vec(),
        coo.values().to_vec(),
    )
    .map_err(|e| anyhow::anyhow!("{}", e))?;

    let obs_names: DataFrameIndex = read_tsv(&barcodes_path)?
        .into_iter()
        .map(|row| row[0].clone())
        .collect();
    let features = read_tsv(&features_path)?;
    let var_names: DataFrameIndex = features
        .iter()
        .map(|row| row.get(1).unwrap_or(&row[0]).clone())
        .collect();
    let mut columns = vec![Series::new(
        "gene_ids",
        features.iter().map(|row| row[0].as_str()).collect::<Vec<_>>(),
    )];
    if features.iter().all(|row| row.len() > 2) && !features.is_empty() {
        columns.push(Series::new(
            "feature_types",
            features.iter().map(|row| row[2].as_str()).collect::<Vec<_>>(),
        ));
    }

    Dataset::new(
        ArrayData::CsrMatrix(CsrMatrix::from(&cells_by_genes)),
        obs_names,
        var_names,
    )
    .with_context(|| format!("inconsistent 10x directory {}", dir.display()))?
    .with_var(DataFrame::new(columns)?)
}

#[derive(Debug, Error)]
pub(crate) enum MtxError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("bad matrix market file")]
    BadMatrixMarketFile,
    #[error("unsupported matrix market format")]
    UnsupportedMatrixMarketFormat,
}

use self::MtxError::*;

#[derive(Copy, Clone, Debug, PartialEq)]
enum SymmetryMode {
    General,
    Symmetric,
    SkewSymmetric,
}

fn parse_header(header: &str) -> Result<SymmetryMode, MtxError> {
    let header = header.to_lowercase();
    if !header.starts_with("%%matrixmarket matrix coordinate") {
        return Err(BadMatrixMarketFile);
    }
    if header.contains("complex") || header.contains("pattern") {
        return Err(UnsupportedMatrixMarketFormat);
    }
    if !(header.contains("real") || header.contains("integer")) {
        return Err(BadMatrixMarketFile);
    }
    if header.contains("general") {
        Ok(SymmetryMode::General)
    } else if header.contains("skew-symmetric") {
        Ok(SymmetryMode::SkewSymmetric)
    } else if header.contains("symmetric") {
        Ok(SymmetryMode::Symmetric)
    } else if header.contains("hermitian") {
        Err(UnsupportedMatrixMarketFormat)
    } else {
        Err(BadMatrixMarketFile)
    }
}

/// Parse a real or integer coordinate Matrix Market stream.
pub(crate) fn read_matrix_market<R: BufRead>(reader: &mut R) -> Result<CooMatrix<f64>, MtxError> {
    // MatrixMarket format specifies lines of at most 1024 chars
    let mut line = String::with_capacity(1024);
    reader.read_line(&mut line)?;
    let sym_mode = parse_header(&line)?;

    // comments and empty lines before the size line
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(BadMatrixMarketFile);
        }
        if !(line.starts_with('%') || line.trim().is_empty()) {
            break;
        }
    }
    let (rows, cols, entries) = {
        let mut infos = line.split_whitespace().map(|s| s.parse::<usize>());
        let mut next = || infos.next().and_then(|x| x.ok()).ok_or(BadMatrixMarketFile);
        (next()?, next()?, next()?)
    };

    let nnz_max = if sym_mode == SymmetryMode::General {
        entries
    } else {
        2 * entries
    };
    let mut row_inds = Vec::with_capacity(nnz_max);
    let mut col_inds = Vec::with_capacity(nnz_max);
    let mut data = Vec::with_capacity(nnz_max);
    let mut n = 0;
    while n < entries {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(BadMatrixMarketFile);
        }
        let mut entry = line.split_whitespace();
        let Some(row) = entry.next() else {
            continue;
        };
        // MatrixMarket indices are 1-based
        let row = row
            .parse::<usize>()
            .ok()
            .and_then(|x| x.checked_sub(1))
            .ok_or(BadMatrixMarketFile)?;
        let col = entry
            .next()
            .and_then(|s| s.parse::<usize>().ok())
            .and_then(|x| x.checked_sub(1))
            .ok_or(BadMatrixMarketFile)?;
        let val = entry
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or(BadMatrixMarketFile)?;
        if entry.next().is_some() {
            return Err(BadMatrixMarketFile);
        }
        row_inds.push(row);
        col_inds.push(col);
        data.push(val);
        match sym_mode {
            SymmetryMode::Symmetric if row != col => {
                row_inds.push(col);
                col_inds.push(row);
                data.push(val);
            }
            SymmetryMode::SkewSymmetric if row == col => return Err(BadMatrixMarketFile),
            SymmetryMode::SkewSymmetric => {
                row_inds.push(col);
                col_inds.push(row);
                data.push(-val);
            }
            _ => {}
        }
        n += 1;
    }

    CooMatrix::try_from_triplets(rows, cols, row_inds, col_inds, data)
        .map_err(|_| BadMatrixMarketFile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DynArray;
    use flate2::{write::GzEncoder, Compression};
    use ndarray::array;
    use std::io::Write;
    use tempfile::tempdir;

    const MTX: &str = "%%MatrixMarket matrix coordinate integer general\n\
        %metadata_json: {}\n\
        3 2 3\n\
        1 1 5\n\
        3 1 1\n\
        2 2 7\n";

    fn write_plain(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    fn write_gz(path: &Path, content: &str) {
        let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        enc.write_all(content.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    #[test]
    fn test_read_10x_v3_gzipped() {
        let dir = tempdir().unwrap();
        write_gz(&dir.path().join("matrix.mtx.gz"), MTX);
        write_gz(&dir.path().join("barcodes.tsv.gz"), "AAAC-1\nAAAG-1\n");
        write_gz(
            &dir.path().join("features.tsv.gz"),
            "ENSG1\tMT-CO1\tGene Expression\nENSG2\tCD3E\tGene Expression\nENSG3\tMT-CO1\tGene Expression\n",
        );

        let dataset = read_10x_mtx(dir.path()).unwrap();
        assert_eq!(dataset.n_obs(), 2);
        assert_eq!(dataset.n_vars(), 3);
        assert_eq!(dataset.var_names().names(), &["MT-CO1", "CD3E", "MT-CO1"]);
        let expected: DynArray = array![[5.0, 0.0, 1.0], [0.0, 7.0, 0.0]].into_dyn().into();
        assert_eq!(dataset.x().to_dense().unwrap(), expected);
        assert_eq!(dataset.var().get_column_names(), vec!["gene_ids", "feature_types"]);
    }

    #[test]
    fn test_read_10x_v2_plain() {
        let dir = tempdir().unwrap();
        write_plain(&dir.path().join("matrix.mtx"), MTX);
        write_plain(&dir.path().join("barcodes.tsv"), "AAAC-1\nAAAG-1\n");
        write_plain(&dir.path().join("genes.tsv"), "ENSG1\tA\nENSG2\tB\nENSG3\tC\n");

        let dataset = read_10x_mtx(dir.path()).unwrap();
        assert_eq!(dataset.x().shape(), vec![2, 3]);
        assert_eq!(dataset.var().get_column_names(), vec!["gene_ids"]);
    }

    #[test]
    fn test_read_10x_missing_file() {
        let dir = tempdir().unwrap();
        write_plain(&dir.path().join("matrix.mtx"), MTX);
        assert!(read_10x_mtx(dir.path()).is_err());
    }

    #[test]
    fn test_symmetric_matrix_market() {
        let mtx = "%%MatrixMarket matrix coordinate real symmetric\n2 2 2\n1 1 1.5\n2 1 2\n";
        let coo = read_matrix_market(&mut mtx.as_bytes()).unwrap();
        assert_eq!(coo.nnz(), 3);
        let bad = "%%MatrixMarket matrix coordinate complex general\n1 1 1\n1 1 1 0\n";
        assert!(matches!(
            read_matrix_market(&mut bad.as_bytes()),
            Err(UnsupportedMatrixMarketFormat)
        ));
    }

    #[test]
    fn test_file_format() {
        assert_eq!("10x".parse::<FileFormat>().unwrap(), FileFormat::TenX);
        assert_eq!("AnnData".parse::<FileFormat>().unwrap(), FileFormat::AnnData);
        assert!("loom".parse::<FileFormat>().is_err());
        assert!("h5ad".parse::<FileFormat>().is_err());
    }
}
