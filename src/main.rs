use cloudrange::{
    BackendFactory, ByteRange, CloudRangeError, CloudRangeResult, RangeSession, RemoteCache,
    RemoteObjectHandle, Settings,
};
use std::time::Instant;

const HEADER_LENGTH: u64 = 16 * 1024;
const USAGE: &str = "usage: cloudrange <uri> [start-end ...]";

fn parse_range(arg: &str) -> CloudRangeResult<ByteRange> {
    arg.split_once('-')
        .and_then(|(start, end)| ByteRange::new(start.parse().ok()?, end.parse().ok()?))
        .ok_or_else(|| CloudRangeError::Config(format!("bad range {arg:?}, expected start-end")))
}

#[tokio::main]
async fn main() -> CloudRangeResult<()> {
    let mut args = std::env::args().skip(1);
    let Some(uri) = args.next() else {
        println!("{USAGE}");
        return Ok(());
    };
    let ranges = args.map(|arg| parse_range(&arg)).collect::<CloudRangeResult<Vec<_>>>()?;

    let settings = Settings::new();
    let handle = RemoteObjectHandle::from_settings(&settings, &uri)?;
    let cache = RemoteCache::with_defaults();
    let factory = BackendFactory::new(cache.signal());
    println!("Opening {handle}");

    let t0 = Instant::now();
    let mut session = RangeSession::open(&factory, cache.clone(), handle, HEADER_LENGTH).await?;
    let Some(size) = session.size().await? else {
        println!("{uri} not found");
        return Ok(());
    };
    let header = session.header().await?.map_or(0, |h| h.len());
    println!(
        "{size} bytes, {header} byte header, opened in {:.6}s",
        t0.elapsed().as_secs_f64()
    );

    if !ranges.is_empty() {
        let t0 = Instant::now();
        let fetch = session.read_ranges(&ranges).await?;
        println!("Read {} ranges in {:.6}s", ranges.len(), t0.elapsed().as_secs_f64());
        for (offset, bytes) in fetch.chunks.iter() {
            println!("  {offset}: {} bytes", bytes.len());
        }
        for (range, e) in fetch.failures.iter() {
            println!("  {range} failed: {e}");
        }
    }

    println!("{}", cache.stats());
    Ok(())
}
