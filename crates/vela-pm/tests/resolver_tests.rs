//! End-to-end resolver tests
//!
//! Each test drives a full resolve run against a temp cache, with local path
//! dependencies or a loopback HTTP listener serving canned responses.

use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use tempfile::TempDir;
use vela_pm::{
    dotted_name, Cache, HttpClient, NullProgress, ProgressSink, ResolveError, Resolver, WorkerPool,
    HEX_DIGEST_LEN,
};

static PROGRESS: NullProgress = NullProgress;

struct Harness {
    _temp: TempDir,
    cache: Cache,
    http: HttpClient,
    work: PathBuf,
}

fn harness() -> Harness {
    let temp = TempDir::new().unwrap();
    let cache = Cache::init(temp.path().join("cache")).unwrap();
    let http = HttpClient::new().unwrap();
    let work = temp.path().join("work");
    fs::create_dir(&work).unwrap();
    Harness {
        cache,
        http,
        work,
        _temp: temp,
    }
}

impl Harness {
    fn project(&self, name: &str, manifest: &str) -> PathBuf {
        let dir = self.work.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vela.toml"), manifest).unwrap();
        dir
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.cache, &self.http, &PROGRESS)
    }

    /// Pre-populate a cache entry as if a previous run fetched it.
    fn seed_cache(&self, hex: &str, files: &[(&str, &str)]) {
        let dir = self.cache.package_dir(hex);
        fs::create_dir_all(&dir).unwrap();
        for (name, contents) in files {
            fs::write(dir.join(name), contents).unwrap();
        }
    }
}

fn well_formed(byte: &str) -> String {
    format!("1220{}", byte.repeat(32))
}

/// Serve exactly one HTTP response on a loopback listener.
fn serve_once(status_line: &str, headers: Vec<(String, String)>, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let status_line = status_line.to_string();

    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request.windows(4).any(|window| window == b"\r\n\r\n") {
                break;
            }
        }

        let mut response = format!("{status_line}\r\n");
        for (name, value) in &headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        ));
        stream.write_all(response.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
        stream.flush().unwrap();
    });

    format!("http://{addr}/pkg.tar.gz")
}

fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Pull the suggested hash out of a missing-hash diagnostic.
fn suggested_hash(report_text: &str) -> String {
    let marker = "expected hash = \"";
    let start = report_text.find(marker).expect("missing-hash note present") + marker.len();
    report_text[start..start + HEX_DIGEST_LEN].to_string()
}

#[test]
fn test_missing_manifest_yields_empty_deps() {
    let h = harness();
    let dir = h.work.join("bare");
    fs::create_dir(&dir).unwrap();

    let mut resolver = h.resolver();
    let resolution = resolver.run(&dir).unwrap();

    assert!(!resolver.report().has_errors());
    assert!(resolution.source.contains("pub const packages = struct {\n};"));
    assert!(resolution
        .source
        .contains("pub const root_deps: []const struct { []const u8, []const u8 } = &.{};"));
    assert!(resolution.source_pkg_dir.join("deps.vela").is_file());
}

#[test]
fn test_cache_hit_skips_fetch() {
    let h = harness();
    let hex = well_formed("ab");
    h.seed_cache(&hex, &[("build.vela", "// x")]);

    // Port 1 refuses connections; a hit must not touch the network.
    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nwebkit = {{ url = \"http://127.0.0.1:1/pkg.tar.gz\", hash = \"{hex}\" }}\n"
        ),
    );

    let mut resolver = h.resolver();
    let resolution = resolver.run(&project).unwrap();

    let slot = resolver.registry().get(&hex).unwrap();
    let pkg = slot.package().unwrap();
    assert_eq!(
        resolver.graph().root_dir(pkg),
        h.cache.package_dir(&hex).as_path()
    );

    assert!(resolution.source.contains(&format!("pub const @\"{hex}\"")));
    assert!(resolution
        .source
        .contains(&format!("pub const build_vela = @import(\"{hex}\");")));
    assert!(resolution.source.contains(&format!(".{{ \"webkit\", \"{hex}\" }}")));
}

#[test]
fn test_cached_package_without_build_script() {
    let h = harness();
    let hex = well_formed("cd");
    h.seed_cache(&hex, &[("lib.vela", "pub const x = 1;")]);

    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nutil = {{ url = \"http://127.0.0.1:1/pkg.tar.gz\", hash = \"{hex}\" }}\n"
        ),
    );

    let mut resolver = h.resolver();
    let resolution = resolver.run(&project).unwrap();

    let slot = resolver.registry().get(&hex).unwrap();
    assert!(slot.package().is_some());
    assert!(!resolution.source.contains("@import"));
}

#[test]
fn test_missing_hash_gets_suggestion() {
    let h = harness();
    let dep_dir = h.work.join("depdir");
    fs::create_dir_all(&dep_dir).unwrap();
    fs::write(dep_dir.join("x.vela"), "").unwrap();

    let project = h.project(
        "proj",
        "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
         [dependencies]\ndep = { path = \"../depdir\" }\n",
    );

    let mut resolver = h.resolver();
    let err = resolver.run(&project).unwrap_err();
    assert!(matches!(err, ResolveError::PackageFetchFailed));

    let plain = resolver.report().render_plain();
    assert!(plain.contains("dependency is missing hash field"));

    let hex = suggested_hash(&plain);
    assert!(hex.starts_with("1220"));
    assert_eq!(hex.len(), HEX_DIGEST_LEN);
}

#[test]
fn test_path_dependency_round_trip() {
    let h = harness();
    let dep_dir = h.work.join("depdir");
    fs::create_dir_all(&dep_dir).unwrap();
    fs::write(dep_dir.join("x.vela"), "pub const x = 1;").unwrap();

    // First pass: learn the hash from the diagnostic.
    let probe = h.project(
        "probe",
        "[package]\nname = \"probe\"\nversion = \"0.1.0\"\n\n\
         [dependencies]\ndep = { path = \"../depdir\" }\n",
    );
    let mut resolver = h.resolver();
    resolver.run(&probe).unwrap_err();
    let hex = suggested_hash(&resolver.report().render_plain());

    // Second pass: pinned.
    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\ndep = {{ path = \"../depdir\", hash = \"{hex}\" }}\n"
        ),
    );
    let mut resolver = h.resolver();
    let resolution = resolver.run(&project).unwrap();

    // Local trees are used in place, not copied into the cache.
    let pkg = resolver.registry().get(&hex).unwrap().package().unwrap();
    assert!(resolver.graph().root_dir(pkg).ends_with("depdir"));
    assert!(resolution.source.contains(&format!(".{{ \"dep\", \"{hex}\" }}")));
}

#[test]
fn test_hash_mismatch_is_diagnosed() {
    let h = harness();
    let dep_dir = h.work.join("depdir");
    fs::create_dir_all(&dep_dir).unwrap();
    fs::write(dep_dir.join("x.vela"), "pub const x = 1;").unwrap();

    let declared = well_formed("ee");
    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\ndep = {{ path = \"../depdir\", hash = \"{declared}\" }}\n"
        ),
    );

    let mut resolver = h.resolver();
    let err = resolver.run(&project).unwrap_err();
    assert!(matches!(err, ResolveError::PackageFetchFailed));

    let plain = resolver.report().render_plain();
    assert!(plain.contains(&format!("hash mismatch: expected {declared}, found 1220")));

    // The declared digest stays unresolved in the registry.
    let slot = resolver.registry().get(&declared).unwrap();
    assert!(slot.package().is_none());
}

#[test]
fn test_same_hash_resolves_to_one_package() {
    let h = harness();
    let hex = well_formed("77");
    h.seed_cache(&hex, &[("build.vela", "// shared")]);

    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\n\
             one = {{ url = \"http://127.0.0.1:1/a.tar.gz\", hash = \"{hex}\" }}\n\
             two = {{ url = \"http://127.0.0.1:1/b.tar.gz\", hash = \"{hex}\" }}\n"
        ),
    );

    let mut resolver = h.resolver();
    let resolution = resolver.run(&project).unwrap();

    let root_table = &resolver.graph().get(resolution.root).table;
    assert_eq!(root_table["one"], root_table["two"]);

    let deps_table = &resolver.graph().get(resolution.deps_pkg).table;
    assert_eq!(deps_table.len(), 1);
    assert_eq!(deps_table[&hex], root_table["one"]);

    // One entry under packages, two references from root_deps.
    let entry = format!("pub const @\"{hex}\"");
    assert_eq!(resolution.source.matches(&entry).count(), 1);
    assert!(resolution.source.contains(&format!(".{{ \"one\", \"{hex}\" }}")));
    assert!(resolution.source.contains(&format!(".{{ \"two\", \"{hex}\" }}")));
}

#[test]
fn test_root_deps_follow_manifest_order() {
    let h = harness();
    let first = well_formed("11");
    let second = well_formed("22");
    h.seed_cache(&first, &[("lib.vela", "z")]);
    h.seed_cache(&second, &[("lib.vela", "a")]);

    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\n\
             zeta = {{ url = \"http://127.0.0.1:1/z.tar.gz\", hash = \"{first}\" }}\n\
             alpha = {{ url = \"http://127.0.0.1:1/a.tar.gz\", hash = \"{second}\" }}\n"
        ),
    );

    let mut resolver = h.resolver();
    let resolution = resolver.run(&project).unwrap();

    let zeta = resolution.source.find("\"zeta\"").unwrap();
    let alpha = resolution.source.find("\"alpha\"").unwrap();
    assert!(zeta < alpha);
}

#[test]
fn test_http_fetch_unpack_verify() {
    let h = harness();
    let archive = tar_gz(&[("pkg/lib.vela", b"a\n")]);

    // First pass learns the content hash from the diagnostic.
    let url = serve_once(
        "HTTP/1.1 200 OK",
        vec![("Content-Type".to_string(), "application/gzip".to_string())],
        archive.clone(),
    );
    let probe = h.project(
        "probe",
        &format!(
            "[package]\nname = \"probe\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nwebkit = {{ url = \"{url}\" }}\n"
        ),
    );
    let mut resolver = h.resolver();
    resolver.run(&probe).unwrap_err();
    let hex = suggested_hash(&resolver.report().render_plain());

    // The failed pass still promoted the content into the cache.
    assert_eq!(
        fs::read(h.cache.package_dir(&hex).join("lib.vela")).unwrap(),
        b"a\n"
    );

    // Second pass: pinned, resolves from cache without another request.
    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nwebkit = {{ url = \"{url}\", hash = \"{hex}\" }}\n"
        ),
    );
    let mut resolver = h.resolver();
    let resolution = resolver.run(&project).unwrap();

    assert!(!resolver.report().has_errors());
    assert!(resolution.source.contains(&format!("pub const @\"{hex}\"")));
    assert!(resolution.source.contains(&format!(".{{ \"webkit\", \"{hex}\" }}")));
    // No manifest in the archive: the entry has an empty dependency list.
    assert!(resolution
        .source
        .contains("pub const deps: []const struct { []const u8, []const u8 } = &.{};"));
}

#[test]
fn test_http_fetch_with_matching_hash_in_one_pass() {
    let h = harness();
    let archive = tar_gz(&[("pkg/lib.vela", b"a\n")]);

    // Learn the hash once.
    let url = serve_once(
        "HTTP/1.1 200 OK",
        vec![("Content-Type".to_string(), "application/x-gzip".to_string())],
        archive.clone(),
    );
    let probe = h.project(
        "probe",
        &format!(
            "[package]\nname = \"probe\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nd = {{ url = \"{url}\" }}\n"
        ),
    );
    let mut resolver = h.resolver();
    resolver.run(&probe).unwrap_err();
    let hex = suggested_hash(&resolver.report().render_plain());

    // Fresh cache so the second run really fetches and verifies.
    let h2 = harness();
    let url = serve_once(
        "HTTP/1.1 200 OK",
        vec![("Content-Type".to_string(), "application/gzip".to_string())],
        archive,
    );
    let project = h2.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nd = {{ url = \"{url}\", hash = \"{hex}\" }}\n"
        ),
    );
    let mut resolver = h2.resolver();
    resolver.run(&project).unwrap();

    assert!(!resolver.report().has_errors());
    assert!(h2.cache.package_dir(&hex).join("lib.vela").is_file());
}

#[test]
fn test_http_404_is_diagnosed() {
    let h = harness();
    let url = serve_once("HTTP/1.1 404 Not Found", Vec::new(), b"gone".to_vec());

    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nd = {{ url = \"{url}\" }}\n"
        ),
    );

    let mut resolver = h.resolver();
    let err = resolver.run(&project).unwrap_err();
    assert!(matches!(err, ResolveError::PackageFetchFailed));
    assert!(resolver.report().render_plain().contains("404"));
}

#[test]
fn test_http_missing_content_type_is_diagnosed() {
    let h = harness();
    let url = serve_once("HTTP/1.1 200 OK", Vec::new(), tar_gz(&[("pkg/x.vela", b"x")]));

    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nd = {{ url = \"{url}\" }}\n"
        ),
    );

    let mut resolver = h.resolver();
    resolver.run(&project).unwrap_err();
    assert!(resolver
        .report()
        .render_plain()
        .contains("missing Content-Type"));
}

#[test]
fn test_octet_stream_with_tarball_disposition() {
    let h = harness();
    let url = serve_once(
        "HTTP/1.1 200 OK",
        vec![
            (
                "Content-Type".to_string(),
                "application/octet-stream".to_string(),
            ),
            (
                "Content-Disposition".to_string(),
                "attachment; filename=\"pkg-1.0.0.tar.gz\"".to_string(),
            ),
        ],
        tar_gz(&[("pkg/lib.vela", b"octet")]),
    );

    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nd = {{ url = \"{url}\" }}\n"
        ),
    );

    // The dependency is unpinned, so the run fails, but classification and
    // unpacking succeeded: the diagnostic carries a computed hash.
    let mut resolver = h.resolver();
    resolver.run(&project).unwrap_err();
    let plain = resolver.report().render_plain();
    assert!(plain.contains("expected hash = \"1220"));
    assert!(!plain.contains("Content-Disposition"));
}

#[test]
fn test_transitive_path_deps_and_dotted_name() {
    let h = harness();

    // Leaf package: a plain source tree.
    let b_dir = h.work.join("bdir");
    fs::create_dir_all(&b_dir).unwrap();
    fs::write(b_dir.join("b.vela"), "pub const b = 2;").unwrap();

    let probe_b = h.project(
        "probe_b",
        "[package]\nname = \"probe\"\nversion = \"0.1.0\"\n\n\
         [dependencies]\nb = { path = \"../bdir\" }\n",
    );
    let mut resolver = h.resolver();
    resolver.run(&probe_b).unwrap_err();
    let hb = suggested_hash(&resolver.report().render_plain());

    // Middle package: depends on the leaf, carries its own manifest.
    let a_dir = h.work.join("adir");
    fs::create_dir_all(&a_dir).unwrap();
    fs::write(a_dir.join("a.vela"), "pub const a = 1;").unwrap();
    fs::write(
        a_dir.join("vela.toml"),
        format!(
            "[package]\nname = \"a\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nb = {{ path = \"../bdir\", hash = \"{hb}\" }}\n"
        ),
    )
    .unwrap();

    let probe_a = h.project(
        "probe_a",
        "[package]\nname = \"probe\"\nversion = \"0.1.0\"\n\n\
         [dependencies]\na = { path = \"../adir\" }\n",
    );
    let mut resolver = h.resolver();
    resolver.run(&probe_a).unwrap_err();
    let ha = suggested_hash(&resolver.report().render_plain());

    // Final project pins the whole chain.
    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\na = {{ path = \"../adir\", hash = \"{ha}\" }}\n"
        ),
    );
    let mut resolver = h.resolver();
    let resolution = resolver.run(&project).unwrap();

    let a_id = resolver.registry().get(&ha).unwrap().package().unwrap();
    let b_id = resolver.registry().get(&hb).unwrap().package().unwrap();
    assert_ne!(a_id, b_id);

    assert_eq!(
        dotted_name(resolver.graph(), resolution.root, None, b_id),
        "root.a.b"
    );
    assert_eq!(
        dotted_name(resolver.graph(), resolution.root, None, a_id),
        "root.a"
    );

    // Depth-first: the leaf's entry precedes its parent's.
    let b_entry = resolution.source.find(&format!("pub const @\"{hb}\"")).unwrap();
    let a_entry = resolution.source.find(&format!("pub const @\"{ha}\"")).unwrap();
    assert!(b_entry < a_entry);
    assert!(resolution.source.contains(&format!(".{{ \"b\", \"{hb}\" }}")));
    assert!(resolution.source.contains(&format!(".{{ \"a\", \"{ha}\" }}")));

    // Both distinct hashes appear in the deps-package exactly once.
    let deps_table = &resolver.graph().get(resolution.deps_pkg).table;
    assert_eq!(deps_table.len(), 2);
}

#[test]
fn test_progress_events() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProgress {
        total: AtomicUsize,
        completed: AtomicUsize,
    }

    impl ProgressSink for CountingProgress {
        fn estimated_total(&self, packages: usize) {
            self.total.store(packages, Ordering::Relaxed);
        }
        fn complete_one(&self) {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    let h = harness();
    let hex = well_formed("42");
    h.seed_cache(&hex, &[("build.vela", "// x")]);

    let project = h.project(
        "proj",
        &format!(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nd = {{ url = \"http://127.0.0.1:1/pkg.tar.gz\", hash = \"{hex}\" }}\n"
        ),
    );

    let progress = CountingProgress::default();
    let mut resolver = Resolver::with_pool(&h.cache, &h.http, WorkerPool::new(2), &progress);
    resolver.run(&project).unwrap();

    assert_eq!(progress.total.load(Ordering::Relaxed), 1);
    assert_eq!(progress.completed.load(Ordering::Relaxed), 1);
}
