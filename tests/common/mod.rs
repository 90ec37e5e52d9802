// Shared test fixtures: a small corpus of seekable-zstd containers plus
// the TSV index, an in-process server on an ephemeral port, and a minimal
// blocking HTTP client.
#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use refget::fhcache::FhCache;
use refget::http::Server;
use refget::store::IndexStore;

/// The small peptide from the reference test corpus (ACO59992), md5
/// 0b49cb6558b97aea58066cbb482c6790.
pub const PEPTIDE: &str = "MKYINCVYNINYKLKPHSHYK";

/// A trunc512 digest present as an MD5 alias target but without a record,
/// and the MD5 key pointing at it.
pub const BROKEN_MD5: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
/// A trunc512 key whose stored value does not parse as a record.
pub const CORRUPT_SHA: &str = "cccccccccccccccccccccccccccccccccccccccccccccccc";
/// A record whose container file does not exist on disk.
pub const ORPHAN_SHA: &str = "dddddddddddddddddddddddddddddddddddddddddddddddd";

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

pub fn trunc512_hex(data: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA512, data);
    hex::encode(&digest.as_ref()[..24])
}

pub fn ga4gh_short(trunc512: &str) -> String {
    let bin = hex::decode(trunc512).expect("hex digest");
    base64::encode_config(bin, base64::URL_SAFE_NO_PAD)
}

/// Deterministic DNA-alphabet filler.
pub fn synth_dna(len: usize, seed: u64) -> Vec<u8> {
    const BASES: [u8; 4] = *b"ACGT";
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            BASES[((state >> 33) % 4) as usize]
        })
        .collect()
}

/// Write `payload` as a zstd seekable-format file: one frame per
/// `frame_payload` bytes plus the trailing skippable-frame seek table.
pub fn write_seekable_zstd(path: &Path, payload: &[u8], frame_payload: usize) {
    let mut out: Vec<u8> = Vec::new();
    let mut frames: Vec<(u32, u32)> = Vec::new();
    for chunk in payload.chunks(frame_payload.max(1)) {
        let comp = zstd::bulk::compress(chunk, 3).expect("compress frame");
        frames.push((comp.len() as u32, chunk.len() as u32));
        out.extend_from_slice(&comp);
    }

    let content_size = frames.len() * 8 + 9;
    out.extend_from_slice(&0x184D_2A5Eu32.to_le_bytes());
    out.extend_from_slice(&(content_size as u32).to_le_bytes());
    for (comp_size, decomp_size) in &frames {
        out.extend_from_slice(&comp_size.to_le_bytes());
        out.extend_from_slice(&decomp_size.to_le_bytes());
    }
    out.extend_from_slice(&(frames.len() as u32).to_le_bytes());
    out.push(0u8);
    out.extend_from_slice(&0x8F92_EAB1u32.to_le_bytes());

    fs::write(path, out).expect("write container");
}

pub struct TestSeq {
    pub name: &'static str,
    pub data: Vec<u8>,
    pub seq_start: u64,
    pub md5: String,
    pub trunc512: String,
}

impl TestSeq {
    pub fn ga4gh(&self) -> String {
        ga4gh_short(&self.trunc512)
    }
}

pub struct Corpus {
    pub dir: TempDir,
    pub container_rel: &'static str,
    pub chromosome: TestSeq,
    pub peptide: TestSeq,
    pub index_path: PathBuf,
}

/// Two sequences concatenated in one container: a 300 kB synthetic
/// chromosome (spans several 128 KiB read chunks and several frames) and
/// the 21-residue peptide from the reference corpus. The index also seeds
/// a broken MD5 alias, a corrupt record and a record whose container file
/// is missing.
pub fn build_corpus() -> Corpus {
    let dir = TempDir::new().expect("tempdir");
    let container_rel = "genome1/seq.txt.zst";

    let chromo_data = synth_dna(300_000, 42);
    let peptide_data = PEPTIDE.as_bytes().to_vec();

    let chromosome = TestSeq {
        name: "Chromosome",
        md5: md5_hex(&chromo_data),
        trunc512: trunc512_hex(&chromo_data),
        seq_start: 0,
        data: chromo_data,
    };
    let peptide = TestSeq {
        name: "ACO59992",
        md5: md5_hex(&peptide_data),
        trunc512: trunc512_hex(&peptide_data),
        seq_start: 300_000,
        data: peptide_data,
    };

    fs::create_dir_all(dir.path().join("genome1")).expect("container dir");
    let mut payload = chromosome.data.clone();
    payload.extend_from_slice(&peptide.data);
    write_seekable_zstd(&dir.path().join(container_rel), &payload, 64 * 1024);

    let mut index = String::new();
    for seq in [&chromosome, &peptide] {
        index.push_str(&format!("{}\t{}\n", seq.md5, seq.trunc512));
        index.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            seq.trunc512,
            container_rel,
            seq.seq_start,
            seq.data.len(),
            seq.name,
            seq.md5
        ));
    }
    // MD5 alias whose target has no record.
    index.push_str(&format!(
        "{}\tbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n",
        BROKEN_MD5
    ));
    // Record that does not parse (three fields).
    index.push_str(&format!("{}\tgenome1/seq.txt.zst\t0\tbroken\n", CORRUPT_SHA));
    // Record pointing at a container that does not exist.
    index.push_str(&format!(
        "{}\tgenome9/seq.txt.zst\t0\t10\tGhost\t{}\n",
        ORPHAN_SHA, BROKEN_MD5
    ));

    let index_path = dir.path().join("indexdb.tkh");
    fs::write(&index_path, index).expect("write index");

    Corpus {
        dir,
        container_rel,
        chromosome,
        peptide,
        index_path,
    }
}

pub fn container_path(corpus: &Corpus) -> PathBuf {
    corpus.dir.path().join(corpus.container_rel)
}

/// Spawn the server on an ephemeral port inside a dedicated runtime
/// thread. The thread is detached; it dies with the test process.
pub fn start_server(corpus: &Corpus) -> SocketAddr {
    start_server_with(corpus, FhCache::new(64), None)
}

pub fn start_server_with(
    corpus: &Corpus,
    fhcache: FhCache,
    alias_authority: Option<String>,
) -> SocketAddr {
    let store = IndexStore::open(&corpus.index_path).expect("open index store");
    let server = Arc::new(Server::new(
        store,
        fhcache,
        corpus.dir.path().to_path_buf(),
        "/",
        alias_authority,
    ));

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("runtime");
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            tx.send(listener.local_addr().expect("local addr"))
                .expect("send addr");
            server.run(listener).await;
        });
    });
    rx.recv().expect("server address")
}

pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("JSON body")
    }
}

pub fn request(
    addr: SocketAddr,
    method: &str,
    target: &str,
    headers: &[(&str, &str)],
) -> Response {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("read timeout");

    let mut req = format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\n");
    for (name, value) in headers {
        req.push_str(&format!("{name}: {value}\r\n"));
    }
    req.push_str("Connection: close\r\n\r\n");
    stream.write_all(req.as_bytes()).expect("send request");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");
    parse_response(&raw, method == "HEAD")
}

pub fn get(addr: SocketAddr, target: &str) -> Response {
    request(addr, "GET", target, &[])
}

pub fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_response(raw: &[u8], head_only: bool) -> Response {
    let sep = find_subslice(raw, b"\r\n\r\n").expect("header terminator");
    let head = std::str::from_utf8(&raw[..sep]).expect("header utf8");
    let mut lines = head.split("\r\n");
    let status_line = lines.next().expect("status line");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .expect("status code")
        .parse()
        .expect("numeric status");
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            line.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    let mut body = raw[sep + 4..].to_vec();
    let chunked = headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("transfer-encoding") && v.eq_ignore_ascii_case("chunked")
    });
    if head_only {
        body.clear();
    } else if chunked {
        body = decode_chunked(&body);
    } else if let Some(length) = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
    {
        body.truncate(length);
    }

    Response {
        status,
        headers,
        body,
    }
}

fn decode_chunked(mut data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let pos = find_subslice(data, b"\r\n").expect("chunk size line");
        let size_str = std::str::from_utf8(&data[..pos]).expect("chunk size utf8");
        let size = usize::from_str_radix(size_str.trim(), 16).expect("hex chunk size");
        data = &data[pos + 2..];
        if size == 0 {
            break;
        }
        out.extend_from_slice(&data[..size]);
        data = &data[size + 2..];
    }
    out
}
