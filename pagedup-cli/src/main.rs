use std::{
    fs,
    io::Write as _,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Args, Parser, ValueEnum};
use pagedup::{
    DEFAULT_PAGE_SIZE, Geometry,
    index::{FingerprintIndex, Granularity},
    recompress::Recompress,
    source::{PageSource, ShortReadPolicy},
};
use serde::Serialize;
use tempfile::NamedTempFile;

mod report;

fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::fmt::{self, format::FmtSpan};
        fmt::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .init();
    }

    match PagedupArgs::parse() {
        PagedupArgs::Exact(args) => exact::run(args),
        PagedupArgs::Flags(args) => flags::run(args),
        PagedupArgs::Patch(args) => patch::run(args),
    }
}

#[derive(Parser)]
#[command(about = "Estimate deduplication and delta-patch savings between two memory dumps")]
enum PagedupArgs {
    /// Exact chunk-level deduplication between two dump directories.
    Exact(exact::ExactArgs),
    /// Exact deduplication of two dump files, broken down by VMA flag.
    Flags(flags::FlagsArgs),
    /// Sampled fingerprint matching plus per-page binary deltas.
    Patch(patch::PatchArgs),
}

#[derive(Default, Clone, Copy, ValueEnum)]
enum ShortRead {
    #[default]
    Drop,
    Pad,
    Reject,
}

impl From<ShortRead> for ShortReadPolicy {
    fn from(mode: ShortRead) -> Self {
        match mode {
            ShortRead::Drop => ShortReadPolicy::Drop,
            ShortRead::Pad => ShortReadPolicy::Pad,
            ShortRead::Reject => ShortReadPolicy::Reject,
        }
    }
}

#[derive(Default, Clone, Copy, ValueEnum)]
enum RecompressMode {
    #[default]
    None,
    Zstd,
    Lz4,
}

impl From<RecompressMode> for Recompress {
    fn from(mode: RecompressMode) -> Self {
        match mode {
            RecompressMode::None => Recompress::None,
            RecompressMode::Zstd => Recompress::Zstd,
            RecompressMode::Lz4 => Recompress::Lz4,
        }
    }
}

#[derive(Args)]
struct DumpArgs {
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,
    /// Only files whose name contains this are read from a dump directory.
    #[arg(long, default_value = "pages-")]
    pattern: String,
    #[arg(long, value_enum, default_value_t)]
    short_read: ShortRead,
}

impl DumpArgs {
    fn open_dir(&self, dir: &Path) -> anyhow::Result<PageSource> {
        let source = PageSource::from_dir(dir, self.page_size, |name| {
            name.contains(self.pattern.as_str())
        })
        .with_context(|| format!("listing dump directory {}", dir.display()))?;
        Ok(source.with_policy(self.short_read.into()))
    }
}

#[derive(Args)]
struct OutputArgs {
    /// Directory the report files are written to.
    #[arg(long, default_value = ".")]
    output: PathBuf,
    /// Also print the statistics as JSON on stdout.
    #[arg(long)]
    json: bool,
}

impl OutputArgs {
    /// Writes every report or none of them.
    ///
    /// Reports are staged as temporary files in the output directory and only
    /// renamed into place once all of them are on disk.
    fn write(&self, reports: &[(String, String)]) -> anyhow::Result<()> {
        fs::create_dir_all(&self.output)
            .with_context(|| format!("creating {}", self.output.display()))?;
        let mut staged = Vec::with_capacity(reports.len());
        for (name, contents) in reports {
            let path = self.output.join(name);
            let file = stage(contents.as_bytes(), &self.output)
                .with_context(|| format!("writing {}", path.display()))?;
            staged.push((file, path));
        }

        let mut placed: Vec<PathBuf> = Vec::with_capacity(staged.len());
        for (file, path) in staged {
            if let Err(e) = file.persist(&path) {
                for done in &placed {
                    let _ = fs::remove_file(done);
                }
                return Err(e).with_context(|| format!("writing {}", path.display()));
            }
            tracing::info!(path = %path.display(), "wrote report");
            placed.push(path);
        }
        Ok(())
    }

    fn print_json(&self, stats: &impl Serialize) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(stats)?);
        }
        Ok(())
    }
}

fn stage(data: &[u8], dir: &Path) -> anyhow::Result<NamedTempFile> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.flush()?;
    Ok(file)
}

/// One integer per line; blank lines are ignored.
fn read_flags(path: &Path) -> anyhow::Result<Vec<u64>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading flags from {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            line.trim()
                .parse()
                .with_context(|| format!("{}:{}: not a flag value", path.display(), n + 1))
        })
        .collect()
}

fn granularity(page_size: usize, chunk_size: usize) -> Granularity {
    if chunk_size == page_size {
        Granularity::Page
    } else {
        Granularity::Chunk(chunk_size)
    }
}

#[derive(Serialize)]
struct Summary<T> {
    geometry: Geometry,
    stats: T,
}

mod exact {
    use super::*;

    #[derive(Args)]
    pub struct ExactArgs {
        first: PathBuf,
        second: PathBuf,
        #[arg(long)]
        chunk_size: usize,
        #[command(flatten)]
        dump: DumpArgs,
        #[command(flatten)]
        output: OutputArgs,
    }

    #[tracing::instrument(skip_all)]
    pub fn run(args: ExactArgs) -> anyhow::Result<()> {
        let geometry = Geometry::new(args.dump.page_size, args.chunk_size)?;
        let granularity = granularity(geometry.page_size(), geometry.chunk_size());
        let first = args.dump.open_dir(&args.first)?;
        let second = args.dump.open_dir(&args.second)?;
        let first = FingerprintIndex::build_exact(&first, granularity)?;
        let second = FingerprintIndex::build_exact(&second, granularity)?;

        let stats = pagedup::aggregate::exact_stats(&first, &second);
        let table = report::exact_table(&stats)?;
        args.output
            .write(&[(format!("analysis_{}.txt", args.chunk_size), table)])?;
        args.output.print_json(&Summary { geometry, stats })
    }
}

mod flags {
    use pagedup::flags::PageFlags;

    use super::*;

    #[derive(Args)]
    pub struct FlagsArgs {
        first: PathBuf,
        first_flags: PathBuf,
        second: PathBuf,
        second_flags: PathBuf,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
        /// Defaults to whole pages.
        #[arg(long)]
        chunk_size: Option<usize>,
        #[command(flatten)]
        output: OutputArgs,
    }

    fn open(
        dump: &Path,
        flags_path: &Path,
        page_size: usize,
    ) -> anyhow::Result<(PageSource, PageFlags)> {
        let source = PageSource::from_files(vec![dump.to_path_buf()], page_size)?;
        let pages = source
            .page_count()
            .with_context(|| format!("sizing {}", dump.display()))?;
        let flags = PageFlags::aligned(read_flags(flags_path)?, pages).with_context(|| {
            format!("flags {} do not match {}", flags_path.display(), dump.display())
        })?;
        Ok((source, flags))
    }

    #[tracing::instrument(skip_all)]
    pub fn run(args: FlagsArgs) -> anyhow::Result<()> {
        let page_size = args.page_size;
        let chunk_size = args.chunk_size.unwrap_or(page_size);
        let geometry = Geometry::new(page_size, chunk_size)?;
        let granularity = granularity(page_size, chunk_size);

        // both flag files are checked before either dump is scanned
        let (first_source, first_flags) = open(&args.first, &args.first_flags, page_size)?;
        let (second_source, second_flags) = open(&args.second, &args.second_flags, page_size)?;
        let first = FingerprintIndex::build_exact(&first_source, granularity)?;
        let second = FingerprintIndex::build_exact(&second_source, granularity)?;

        let stats =
            pagedup::aggregate::flag_stats(&first, &first_flags, &second, &second_flags)?;
        let common = report::flag_table(&stats.first.common, &stats.second.common);
        let distinct = report::flag_table(&stats.first.distinct, &stats.second.distinct);
        args.output.write(&[
            (format!("common_analysis_{chunk_size}.txt"), common),
            (format!("distinct_analysis_{chunk_size}.txt"), distinct),
        ])?;
        args.output.print_json(&Summary { geometry, stats })
    }
}

mod patch {
    use pagedup::{
        aggregate::PatchStats,
        index::{SampledIndex, SampledIndexOptions},
        matcher::{PatchOptions, patch_source},
        sampler::{DEFAULT_NUM_SAMPLES, DEFAULT_SEED, SampleLocations},
    };

    use super::*;

    #[derive(Serialize)]
    struct PatchSummary<'a> {
        locations: &'a SampleLocations,
        options: PatchOptions,
        stats: PatchStats,
    }

    #[derive(Args)]
    pub struct PatchArgs {
        base: PathBuf,
        target: PathBuf,
        #[arg(long, default_value_t = 64)]
        chunk_size: usize,
        /// Sampled chunk offsets per page.
        #[arg(long, default_value_t = DEFAULT_NUM_SAMPLES)]
        samples: usize,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
        /// Keep at most this many base pages per sampled fingerprint.
        #[arg(long)]
        bucket_limit: Option<NonZeroUsize>,
        #[arg(long)]
        skip_zero_samples: bool,
        /// Count deltas larger than a page as raw pages.
        #[arg(long)]
        clamp_to_raw: bool,
        #[arg(long, value_enum, default_value_t)]
        recompress: RecompressMode,
        #[command(flatten)]
        dump: DumpArgs,
        #[command(flatten)]
        output: OutputArgs,
    }

    #[tracing::instrument(skip_all)]
    pub fn run(args: PatchArgs) -> anyhow::Result<()> {
        let geometry = Geometry::new(args.dump.page_size, args.chunk_size)?;
        let locations = SampleLocations::seeded(
            geometry.page_size(),
            geometry.chunk_size(),
            args.samples,
            args.seed,
        )?;
        let options = SampledIndexOptions {
            bucket_limit: args.bucket_limit,
            skip_zero_samples: args.skip_zero_samples,
            seed: args.seed,
        };
        let base = args.dump.open_dir(&args.base)?;
        let index = SampledIndex::build_with(&base, locations, options)?;

        let target = args.dump.open_dir(&args.target)?;
        let options = PatchOptions {
            clamp_to_raw: args.clamp_to_raw,
            recompress: args.recompress.into(),
        };
        let stats = patch_source(&index, &target, options)?;
        tracing::info!(
            "Raw Length: {}, Dedup Length: {}, Patch Length: {}",
            stats.raw_length,
            stats.patched_length,
            stats.patch_length
        );

        args.output.write(&[(
            format!("patch_{}.txt", args.chunk_size),
            report::patch_table(&stats),
        )])?;
        args.output.print_json(&Summary {
            geometry,
            stats: PatchSummary {
                locations: index.locations(),
                options,
                stats,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_file_is_one_integer_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags");
        fs::write(&path, "1\n512\n\n  3 \n").unwrap();
        assert_eq!(read_flags(&path).unwrap(), [1, 512, 3]);

        fs::write(&path, "1\nheap\n").unwrap();
        let err = read_flags(&path).unwrap_err();
        assert!(format!("{err:#}").contains(":2:"));
    }

    #[test]
    fn chunk_size_equal_to_page_is_whole_page() {
        assert_eq!(granularity(4096, 4096), Granularity::Page);
        assert_eq!(granularity(4096, 64), Granularity::Chunk(64));
    }

    #[test]
    fn reports_land_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputArgs {
            output: dir.path().join("results"),
            json: false,
        };
        output
            .write(&[("analysis_64.txt".to_owned(), "Type, Count1, Count2\n".to_owned())])
            .unwrap();
        let written = fs::read_to_string(dir.path().join("results/analysis_64.txt")).unwrap();
        assert_eq!(written, "Type, Count1, Count2\n");
    }

    #[test]
    fn failed_report_leaves_no_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("distinct_analysis_64.txt")).unwrap();
        let output = OutputArgs {
            output: dir.path().to_path_buf(),
            json: false,
        };
        let result = output.write(&[
            ("common_analysis_64.txt".to_owned(), "Total, 1, 1\n".to_owned()),
            ("distinct_analysis_64.txt".to_owned(), "Total, 0, 0\n".to_owned()),
        ]);
        assert!(result.is_err());

        let mut left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, ["distinct_analysis_64.txt"]);
    }

    #[test]
    fn json_summary_names_geometry() {
        let summary = Summary {
            geometry: Geometry::new(4096, 64).unwrap(),
            stats: 7,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["geometry"]["page_size"], 4096);
        assert_eq!(json["geometry"]["chunk_size"], 64);
        assert_eq!(json["stats"], 7);
    }

    #[test]
    fn cli_parses() {
        use clap::CommandFactory as _;
        PagedupArgs::command().debug_assert();
    }
}
