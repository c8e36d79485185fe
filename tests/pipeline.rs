//! End-to-end pipeline tests against stub collaborators.
//!
//! The LAS tools, the tiler, and the datum-transform service are all
//! replaced with scripted stand-ins: shell scripts that record their
//! arguments, and a local HTTP listener that serves canned JSON. The tests
//! assert the orchestration itself: step sequencing, hint resolution,
//! Z-translation composition, and merge edge cases.

#![cfg(unix)]

use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;

struct StubTools {
    dir: tempfile::TempDir,
    log: PathBuf,
}

impl StubTools {
    /// Create stub las2las/lasinfo/tiler scripts. `wkt` is the CRS line the
    /// lasinfo stub reports.
    fn new(wkt: &str) -> Self {
        let dir = tempfile::tempdir().expect("create stub dir");
        let log = dir.path().join("invocations.log");

        write_script(
            &dir.path().join("las2las"),
            r#"#!/bin/sh
echo "las2las $*" >> "$PSTAGE_STUB_LOG"
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
case " $* " in
  *" -keep_every_nth "*)
    echo "-105.0 40.0"
    echo "-105.2 40.2"
    ;;
  *)
    if [ -n "$out" ]; then echo fake > "$out"; fi
    ;;
esac
exit 0
"#,
        );

        let lasinfo_body = format!(
            "#!/bin/sh\necho \"lasinfo $*\" >> \"$PSTAGE_STUB_LOG\"\ncat <<'EOF'\nlasinfo report\n{wkt}\nnumber of points: 42\nEOF\nexit 0\n"
        );
        write_script(&dir.path().join("lasinfo"), &lasinfo_body);

        write_script(
            &dir.path().join("tiler"),
            r#"#!/bin/sh
echo "tiler $*" >> "$PSTAGE_STUB_LOG"
cmd="$1"
shift
if [ "$cmd" = "convert" ]; then
  out=""
  prev=""
  for a in "$@"; do
    if [ "$prev" = "--out" ]; then out="$a"; fi
    prev="$a"
  done
  mkdir -p "$out"
  echo '{}' > "$out/tileset.json"
elif [ "$cmd" = "merge" ]; then
  echo '{}' > "$1/tileset.json"
fi
exit 0
"#,
        );

        Self { dir, log }
    }

    fn invocations(&self) -> String {
        fs::read_to_string(&self.log).unwrap_or_default()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_pstage"));
        command
            .env("PSTAGE_LAS2LAS", self.dir.path().join("las2las"))
            .env("PSTAGE_LASINFO", self.dir.path().join("lasinfo"))
            .env("PSTAGE_TILER", self.dir.path().join("tiler"))
            .env("PSTAGE_STUB_LOG", &self.log);
        for proxy in ["http_proxy", "https_proxy", "HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY"] {
            command.env_remove(proxy);
        }
        command
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write stub script");
    let mut perms = fs::metadata(path).expect("stat stub script").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod stub script");
}

/// Serve `responses` (one per connection) as HTTP 200 JSON, recording each
/// request line. Join the handle only after asserting the client succeeded,
/// or it will wait for connections that never came.
fn spawn_json_server(responses: Vec<String>) -> (String, thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub service");
    let addr = listener.local_addr().expect("stub service addr");
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for body in responses {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).expect("read request");
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            seen.push(String::from_utf8_lossy(&request).into_owned());
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).expect("write response");
        }
        seen
    });
    (format!("http://{addr}"), handle)
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

const COMPOUND_WKT: &str = r#"COMPD_CS["NAD83 / UTM zone 13N + NAVD88 height",PROJCS["NAD83 / UTM zone 13N",GEOGCS["NAD83",AUTHORITY["EPSG","4269"]],AUTHORITY["EPSG","26913"]],VERT_CS["NAVD88 height",VERT_DATUM["North American Vertical Datum 1988",2005],AUTHORITY["EPSG","5703"]]]"#;

const HORIZONTAL_WKT: &str = r#"PROJCS["NAD83 / UTM zone 13N",GEOGCS["NAD83",AUTHORITY["EPSG","4269"]],AUTHORITY["EPSG","26913"]]"#;

#[test]
fn file_declared_navd88_drives_the_z_translation() {
    let tools = StubTools::new(COMPOUND_WKT);
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("site.laz");
    fs::write(&input, b"not a real laz").unwrap();

    let (url, server) = spawn_json_server(vec![r#"{"t_z": "-28.14"}"#.to_string()]);

    let output = tools
        .command()
        .env("PSTAGE_VDATUM_URL", format!("{url}/convert"))
        .args(["tile", "--region", "contiguous"])
        .arg(&input)
        .output()
        .expect("run pstage");
    let stderr = stderr_text(&output);
    assert!(output.status.success(), "pstage failed: {stderr}");

    // The file hint won without any user hint: the datum step was added and
    // every reported step count matches the executed count.
    assert!(stderr.contains("(step 5 of 5)"), "steps misreported: {stderr}");

    // Correction composes additively with the (zero) manual translation.
    let invocations = tools.invocations();
    assert!(
        invocations.contains("-translate_z -28.14"),
        "rewrite did not receive the correction: {invocations}"
    );

    // The lookup asked the regional service for NAVD88 in the mean position's
    // region, lat/lon from the geographic sample mean.
    let requests = server.join().expect("join stub service");
    assert_eq!(requests.len(), 1);
    assert!(requests[0].contains("region=contiguous"), "{}", requests[0]);
    assert!(requests[0].contains("s_v_frame=NAVD88"), "{}", requests[0]);
    assert!(requests[0].contains("s_y=40.1"), "{}", requests[0]);

    // Intermediate artifacts are gone; the tileset is in place.
    assert!(work.path().join("3dtiles/site/tileset.json").is_file());
    assert!(!work.path().join("site-wkt.laz").exists());
    assert!(!work.path().join("rewrite/site.las").exists());
}

#[test]
fn user_hint_fills_in_when_the_header_is_silent() {
    let tools = StubTools::new(HORIZONTAL_WKT);
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("site.laz");
    fs::write(&input, b"not a real laz").unwrap();

    let (url, server) = spawn_json_server(vec![r#"{"t_z": -1.5}"#.to_string()]);

    let output = tools
        .command()
        .env("PSTAGE_VDATUM_URL", format!("{url}/convert"))
        .args(["tile", "--from-vrs", "MSL", "--translate-z", "2.0"])
        .arg(&input)
        .output()
        .expect("run pstage");
    let stderr = stderr_text(&output);
    assert!(output.status.success(), "pstage failed: {stderr}");
    assert!(stderr.contains("(step 5 of 5)"), "steps misreported: {stderr}");

    let requests = server.join().expect("join stub service");
    assert!(requests[0].contains("s_v_frame=LMSL"), "{}", requests[0]);

    // manual 2.0 + correction -1.5
    let invocations = tools.invocations();
    assert!(
        invocations.contains("-translate_z 0.5"),
        "translation not composed: {invocations}"
    );
}

#[test]
fn base_job_reports_four_steps_and_cleans_up() {
    let tools = StubTools::new(HORIZONTAL_WKT);
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("survey.laz");
    fs::write(&input, b"not a real laz").unwrap();

    let output = tools
        .command()
        .arg("tile")
        .arg(&input)
        .output()
        .expect("run pstage");
    let stderr = stderr_text(&output);
    assert!(output.status.success(), "pstage failed: {stderr}");
    assert!(stderr.contains("(step 4 of 4)"), "steps misreported: {stderr}");
    assert!(!stderr.contains("step 5"), "unexpected extra step: {stderr}");

    // No datum hints anywhere: no lookup, no translation beyond 0.
    let invocations = tools.invocations();
    assert!(invocations.contains("-translate_z 0"), "{invocations}");
    assert!(work.path().join("3dtiles/survey/tileset.json").is_file());
    assert!(!work.path().join("survey-wkt.laz").exists());
    assert!(!work.path().join("survey-wkt.laz-wkt.txt").exists());
}

#[test]
fn merge_with_a_single_tileset_warns_and_exits_zero() {
    let tools = StubTools::new(HORIZONTAL_WKT);
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("site.laz");
    fs::write(&input, b"not a real laz").unwrap();
    // A stale directory without a manifest does not count as a tileset.
    fs::create_dir_all(work.path().join("3dtiles/leftover")).unwrap();

    let output = tools
        .command()
        .args(["tile", "--merge"])
        .arg(&input)
        .output()
        .expect("run pstage");
    let stderr = stderr_text(&output);
    assert!(output.status.success(), "pstage failed: {stderr}");
    assert!(stderr.contains("(step 5 of 5)"), "steps misreported: {stderr}");
    assert!(
        stderr.contains("could not be created"),
        "merge warning missing: {stderr}"
    );

    // Both directories remain and no unified manifest was written.
    assert!(work.path().join("3dtiles/site").is_dir());
    assert!(work.path().join("3dtiles/leftover").is_dir());
    assert!(!work.path().join("3dtiles/tileset.json").exists());
}

#[test]
fn merge_with_two_tilesets_invokes_the_merge_tool() {
    let tools = StubTools::new(HORIZONTAL_WKT);
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("west.laz");
    fs::write(&input, b"not a real laz").unwrap();
    // A prior tileset from an earlier job.
    let prior = work.path().join("3dtiles/east");
    fs::create_dir_all(&prior).unwrap();
    fs::write(prior.join("tileset.json"), b"{}").unwrap();

    let output = tools
        .command()
        .args(["tile", "--merge"])
        .arg(&input)
        .output()
        .expect("run pstage");
    let stderr = stderr_text(&output);
    assert!(output.status.success(), "pstage failed: {stderr}");

    let invocations = tools.invocations();
    assert!(invocations.contains("tiler merge"), "{invocations}");
    assert!(work.path().join("3dtiles/tileset.json").is_file());
}

#[test]
fn archiving_retains_the_rewritten_file_and_moves_the_input() {
    let tools = StubTools::new(HORIZONTAL_WKT);
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("site.laz");
    fs::write(&input, b"not a real laz").unwrap();

    let output = tools
        .command()
        .args(["tile", "--archive"])
        .arg(&input)
        .output()
        .expect("run pstage");
    let stderr = stderr_text(&output);
    assert!(output.status.success(), "pstage failed: {stderr}");

    assert!(!input.exists(), "input was not archived");
    assert!(work.path().join("archive/site.laz").is_file());
    // Archiving retains the rewritten copy for reprocessing.
    assert!(work.path().join("rewrite/site.las").is_file());
    assert!(!work.path().join("site-wkt.laz").exists());
}

#[test]
fn missing_input_fails_before_any_processing() {
    let tools = StubTools::new(HORIZONTAL_WKT);
    let output = tools
        .command()
        .args(["tile", "/nonexistent/nowhere.laz"])
        .output()
        .expect("run pstage");
    assert!(!output.status.success());
    assert!(tools.invocations().is_empty(), "tools ran before validation");
}

#[test]
fn unresolvable_user_hint_is_fatal() {
    let tools = StubTools::new(HORIZONTAL_WKT);
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("site.laz");
    fs::write(&input, b"not a real laz").unwrap();

    let output = tools
        .command()
        .args(["tile", "--from-vrs", "not-a-datum"])
        .arg(&input)
        .output()
        .expect("run pstage");
    assert!(!output.status.success());
    let stderr = stderr_text(&output);
    assert!(
        stderr.contains("not-a-datum"),
        "offending hint not reported: {stderr}"
    );
}

#[test]
fn insar_csv_is_staged_through_the_rewriter() {
    let tools = StubTools::new(HORIZONTAL_WKT);
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("disp.csv");
    fs::write(&input, "-105.1,40.2,0.5\n-105.2,40.3,0.9\n").unwrap();

    let output = tools
        .command()
        .arg("insar")
        .arg(&input)
        .output()
        .expect("run pstage");
    let stderr = stderr_text(&output);
    assert!(output.status.success(), "pstage failed: {stderr}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("disp.laz"), "laz path not reported: {stdout}");
    assert!(work.path().join("disp.laz").is_file());
    // The intermediate color table is cleaned up.
    assert!(!work.path().join("disp-llzrgb.txt").exists());
    let invocations = tools.invocations();
    assert!(invocations.contains("-iparse xyzRGB"), "{invocations}");
}
