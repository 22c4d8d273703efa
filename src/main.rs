use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ovstore::{
    decode_evalue, Bucketizer, FilterPolicy, Merger, Overlap, OverlapFilter, ReadFlags,
    SliceSorter, Store,
};

/// Flags source for inputs without library metadata: one library, every
/// read eligible for trimming and dedup.
struct UniformFlags {
    num_reads: u32,
}
impl ReadFlags for UniformFlags {
    fn num_reads(&self) -> u32 {
        self.num_reads
    }
    fn library(&self, _read_id: u32) -> u32 {
        1
    }
    fn trimming_requested(&self, _read_id: u32) -> bool {
        true
    }
    fn dedup_requested(&self, _read_id: u32) -> bool {
        true
    }
}

fn parse_overlap(line: &str) -> Result<Overlap> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 8 {
        bail!("expected 8 fields (a b flipped abgn aend bbgn bend erate), got {}", fields.len());
    }
    let mut ov = Overlap::new(fields[0].parse()?, fields[1].parse()?);
    ov.set_flipped(fields[2].parse::<u8>()? != 0);
    ov.set_coords(
        fields[3].parse()?,
        fields[4].parse()?,
        fields[5].parse()?,
        fields[6].parse()?,
    );
    ov.set_erate(fields[7].parse()?);
    Ok(ov)
}

fn build(store: &Path, input: &Path, num_slices: u32) -> Result<()> {
    let handle = fs::File::open(input)
        .map(io::BufReader::new)
        .with_context(|| format!("opening {}", input.display()))?;

    let mut raw = Vec::new();
    let mut max_id = 0u32;
    for (lineno, line) in handle.lines().enumerate() {
        let line = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let ov = parse_overlap(&line).with_context(|| format!("line {}", lineno + 1))?;
        max_id = max_id.max(ov.a_id).max(ov.b_id);
        raw.push(ov);
    }
    if raw.is_empty() {
        bail!("{} holds no overlaps", input.display());
    }

    let flags = UniformFlags { num_reads: max_id };
    let mut filter = OverlapFilter::new(&flags, FilterPolicy::default());

    let mut worker = Bucketizer::new(store, 1, num_slices, max_id)?;
    for ov in &raw {
        let mut fwd = *ov;
        let mut rev = ov.reversed();
        filter.filter(&mut fwd, &mut rev);
        if fwd.is_kept() {
            worker.push(&fwd)?;
        }
        if rev.is_kept() {
            worker.push(&rev)?;
        }
    }
    worker.finish()?;
    let c = filter.counters();
    eprintln!(
        "filtered {} sides: {} assembly, {} trimming, {} dedup, {} over the error ceiling",
        2 * raw.len(),
        c.saved_assembly,
        c.saved_trimming,
        c.saved_dedup,
        c.skipped_erate,
    );

    for slice in 1..=num_slices {
        SliceSorter::new(store, slice, 1).run()?;
    }
    let info = Merger::new(store, num_slices).merge()?;

    eprintln!(
        "built {}: {} overlaps for reads {}..={} across {} data files",
        store.display(),
        info.num_overlaps(),
        info.smallest_id(),
        info.largest_id(),
        info.num_files(),
    );
    Ok(())
}

fn dump(store: &Path, id: Option<u32>) -> Result<()> {
    let mut reader = Store::open(store)?;
    let mut out = io::BufWriter::new(io::stdout().lock());

    let mut emit = |ov: &Overlap| -> Result<()> {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.4}",
            ov.a_id,
            ov.b_id,
            u8::from(ov.flipped()),
            ov.a_bgn,
            ov.a_end,
            ov.b_bgn,
            ov.b_end,
            ov.erate(),
        )?;
        Ok(())
    };

    match id {
        Some(id) => {
            let mut buf = Vec::new();
            reader.read_overlaps_for_id(id, &mut buf)?;
            for ov in &buf {
                emit(ov)?;
            }
        }
        None => {
            while let Some(ov) = reader.read_overlap()? {
                emit(&ov)?;
            }
        }
    }
    Ok(())
}

fn stats(store: &Path) -> Result<()> {
    let reader = Store::open(store)?;
    let info = reader.info();

    println!("store          {}", store.display());
    println!("overlaps       {}", info.num_overlaps());
    println!("reads          {}..={}", info.smallest_id(), info.largest_id());
    println!("data files     {}", info.num_files());
    println!("evalue overlay {}", if reader.has_evalues() { "yes" } else { "no" });

    let hist = reader.histogram()?;
    if let Some(max) = hist.max_erate_bucket() {
        println!("error rates:");
        for (bucket, &count) in hist.erate_buckets().iter().enumerate().take(max + 1) {
            if count > 0 {
                let low = decode_evalue((bucket << 10) as u16);
                println!("  {low:>7.4}+  {count}");
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("build") if args.len() == 4 || args.len() == 5 => {
            let num_slices = match args.get(4) {
                Some(n) => n.parse().context("slice count")?,
                None => 1,
            };
            build(Path::new(&args[2]), Path::new(&args[3]), num_slices)
        }
        Some("dump") if args.len() == 3 || args.len() == 4 => {
            let id = args.get(3).map(|s| s.parse()).transpose().context("read id")?;
            dump(Path::new(&args[2]), id)
        }
        Some("stats") if args.len() == 3 => stats(Path::new(&args[2])),
        Some("evalues") if args.len() >= 4 => {
            let files: Vec<PathBuf> = args[3..].iter().map(PathBuf::from).collect();
            Store::open(Path::new(&args[2]))?.add_evalues(&files)?;
            Ok(())
        }
        _ => {
            eprintln!("usage: ovstore build <store> <overlaps.tsv> [num-slices]");
            eprintln!("       ovstore dump <store> [read-id]");
            eprintln!("       ovstore stats <store>");
            eprintln!("       ovstore evalues <store> <corrections>...");
            std::process::exit(1);
        }
    }
}
