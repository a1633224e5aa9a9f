use crate::common_io::{read_lines_of_types, write_lines};
use candle_core::{DType, Device, Tensor};

/// Delimited text I/O of 2d matrices
pub trait IoOps: Sized {
    fn read_file_delim(file: &str, delim: &[char], skip: usize) -> anyhow::Result<Self>;

    fn from_tsv(tsv_file: &str, skip: usize) -> anyhow::Result<Self> {
        Self::read_file_delim(tsv_file, &['\t'], skip)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }

    fn to_csv(&self, csv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(csv_file, ",")
    }
}

impl IoOps for Tensor {
    fn read_file_delim(file: &str, delim: &[char], skip: usize) -> anyhow::Result<Self> {
        let data = read_lines_of_types::<f32>(file, delim, skip)?;

        if data.is_empty() {
            return Err(anyhow::anyhow!("No data in file {}", file));
        }

        let ncols = data[0].len();
        let nrows = data.len();
        if let Some(i) = data.iter().position(|row| row.len() != ncols) {
            return Err(anyhow::anyhow!(
                "{}: row {} has {} columns, expected {}",
                file,
                i + 1,
                data[i].len(),
                ncols
            ));
        }
        let data = data.into_iter().flatten().collect::<Vec<_>>();

        Ok(Tensor::from_vec(data, (nrows, ncols), &Device::Cpu)?)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()> {
        let dims = self.dims();

        if dims.len() != 2 {
            return Err(anyhow::anyhow!("Expected 2 dimensions, got {}", dims.len()));
        }

        let rows = self.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let lines: Vec<Box<str>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&x| format!("{}", x))
                    .collect::<Vec<_>>()
                    .join(delim)
                    .into_boxed_str()
            })
            .collect();

        write_lines(&lines, file)?;

        Ok(())
    }
}

/// Read a matrix, choosing the delimiter by extension
/// (`.csv[.gz]` comma, `.tsv[.gz]` tab, otherwise whitespace)
pub fn read_matrix(file: &str, skip: usize) -> anyhow::Result<Tensor> {
    let stem = file.strip_suffix(".gz").unwrap_or(file);
    if stem.ends_with(".csv") {
        Tensor::read_file_delim(file, &[','], skip)
    } else if stem.ends_with(".tsv") {
        Tensor::from_tsv(file, skip)
    } else {
        Tensor::read_file_delim(file, &[], skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsv_and_csv() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let x = Tensor::new(&[[1f32, 0.5], [-2., 3.]], &Device::Cpu)?;

        for name in ["m.tsv", "m.csv.gz", "m.txt"] {
            let file = dir.path().join(name);
            let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;
            if name == "m.txt" {
                x.write_file_delim(file, " ")?;
            } else if name.contains(".csv") {
                x.to_csv(file)?;
            } else {
                x.to_tsv(file)?;
            }
            let y = read_matrix(file, 0)?;
            assert_eq!(y.to_vec2::<f32>()?, x.to_vec2::<f32>()?);
        }
        Ok(())
    }

    #[test]
    fn ragged_rows_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("r.tsv");
        let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;
        write_lines(&["1\t2", "3"], file)?;
        assert!(read_matrix(file, 0).is_err());
        Ok(())
    }
}
