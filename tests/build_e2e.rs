//! Full pipeline runs: configuration to layer archive, with the in-memory
//! package manager standing in for apk.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::TempDir;

use layerkit::apk::{ApkDriver, FakePackageManager};
use layerkit::artifact::{build_layer, Compression, LayerInfo};
use layerkit::{Architecture, BuildContext, Builder, ConfigError, ImageConfiguration, Options};

struct Entry {
    uid: u64,
    gid: u64,
    mode: u32,
    mtime: u64,
    link: Option<PathBuf>,
}

fn config(yaml: &str) -> ImageConfiguration {
    serde_yaml::from_str(yaml).unwrap()
}

fn host_options() -> Options {
    let mut options = Options::new(Architecture::host());
    options.source_date_epoch = 1_700_000_000;
    options
}

fn build(temp: &Path, name: &str, yaml: &str) -> LayerInfo {
    let mut ctx = BuildContext::new(&temp.join(name), host_options()).unwrap();
    Builder::new(FakePackageManager::new().with_file("bin/busybox", "#!/bin/true\n", 0o755))
        .build(&mut ctx, &config(yaml))
        .unwrap();
    build_layer(&ctx, &temp.join(format!("{}.tar.gz", name)), Compression::Gzip).unwrap()
}

fn entries(layer: &Path) -> BTreeMap<String, Entry> {
    let mut archive = tar::Archive::new(GzDecoder::new(fs::File::open(layer).unwrap()));
    let mut out = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let entry = entry.unwrap();
        let header = entry.header();
        let path = entry.path().unwrap().to_string_lossy().trim_end_matches('/').to_string();
        out.insert(
            path,
            Entry {
                uid: header.uid().unwrap(),
                gid: header.gid().unwrap(),
                mode: header.mode().unwrap(),
                mtime: header.mtime().unwrap(),
                link: entry.link_name().unwrap().map(|l| l.into_owned()),
            },
        );
    }
    out
}

#[test]
fn test_single_package_defaults() {
    let temp = TempDir::new().unwrap();
    let mut ctx = BuildContext::new(&temp.path().join("root"), host_options()).unwrap();
    Builder::new(FakePackageManager::new())
        .build(&mut ctx, &config("contents: { packages: [alpine-baselayout] }"))
        .unwrap();

    let installed = fs::read_to_string(ctx.path("lib/apk/db/installed")).unwrap();
    assert!(installed.contains("P:alpine-baselayout"));
    assert!(ctx.path("etc/passwd").is_file());
    assert!(ctx.path("etc/group").is_file());

    let release = fs::read_to_string(ctx.path("etc/os-release")).unwrap();
    assert!(release.lines().any(|l| l == "ID=unknown"));
    assert!(release.lines().any(|l| l == "NAME=\"layerkit-generated image\""));
}

#[test]
fn test_user_gid_defaults_to_uid_with_private_home() {
    let temp = TempDir::new().unwrap();
    let mut ctx = BuildContext::new(&temp.path().join("root"), host_options()).unwrap();
    Builder::new(FakePackageManager::new())
        .build(
            &mut ctx,
            &config("accounts: { run-as: app, users: [{ username: app, uid: 1000, gid: 0 }] }"),
        )
        .unwrap();

    let passwd = fs::read_to_string(ctx.path("etc/passwd")).unwrap();
    assert!(passwd.contains("app:x:1000:1000:"));
    assert!(ctx.path("home/app").is_dir());

    let layer = build_layer(&ctx, &temp.path().join("layer.tar.gz"), Compression::Gzip).unwrap();
    let entries = entries(&layer.path);
    let home = &entries["home/app"];
    assert_eq!((home.uid, home.gid), (1000, 1000));
    assert_eq!(home.mode & 0o7777, 0o700);
}

#[test]
fn test_builds_at_different_times_are_byte_identical() {
    let temp = TempDir::new().unwrap();
    let yaml = r#"
contents: { packages: [busybox, musl] }
accounts: { users: [{ username: app, uid: 1000 }] }
paths:
  - { path: /data, type: directory, uid: 1000, gid: 1000, permissions: 0o750 }
  - { path: /bin/sh, type: symlink, source: /bin/busybox }
  - { path: /bin/ash, type: hardlink, source: /bin/busybox }
os-release: { id: alpine, name: Example }
"#;

    let first = build(temp.path(), "first", yaml);
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let second = build(temp.path(), "second", yaml);

    assert_eq!(first.digest, second.digest);
    assert_eq!(first.diff_id, second.diff_id);
    assert_eq!(fs::read(&first.path).unwrap(), fs::read(&second.path).unwrap());

    let entries = entries(&first.path);
    assert!(entries.values().all(|e| e.mtime == 1_700_000_000));
    assert_eq!(entries["data"].mode & 0o7777, 0o750);
}

#[test]
fn test_symlink_target_is_literal() {
    let temp = TempDir::new().unwrap();
    let layer = build(
        temp.path(),
        "root",
        "paths: [{ path: /bin/sh, type: symlink, source: /bin/busybox }]",
    );

    let link = fs::read_link(temp.path().join("root/bin/sh")).unwrap();
    assert_eq!(link, PathBuf::from("/bin/busybox"));
    let entries = entries(&layer.path);
    assert_eq!(entries["bin/sh"].link.as_deref(), Some(Path::new("/bin/busybox")));
}

#[test]
fn test_fixation_is_emulated_only_for_foreign_targets() {
    let temp = TempDir::new().unwrap();
    let driver = ApkDriver::new().unwrap();

    let mut foreign = Options::new(Architecture::parse("arm64"));
    foreign.host = Architecture::parse("amd64");
    let ctx = BuildContext::new(&temp.path().join("arm64"), foreign).unwrap();
    let fix = driver.fixate_command(&ctx);
    assert_eq!(fix.program(), "proot");
    assert_eq!(&fix.get_args()[..4], &["-q", "qemu-aarch64", "apk", "fix"]);

    let mut native = Options::new(Architecture::parse("amd64"));
    native.host = Architecture::parse("amd64");
    let ctx = BuildContext::new(&temp.path().join("amd64"), native).unwrap();
    let fix = driver.fixate_command(&ctx);
    assert_eq!(fix.program(), "apk");
    assert_eq!(fix.get_args()[0], "fix");
}

#[test]
fn test_zstd_layer_decompresses_to_same_tar() {
    let temp = TempDir::new().unwrap();
    let mut ctx = BuildContext::new(&temp.path().join("root"), host_options()).unwrap();
    Builder::new(FakePackageManager::new())
        .build(&mut ctx, &config("contents: { packages: [busybox] }"))
        .unwrap();

    let gz = build_layer(&ctx, &temp.path().join("l.tar.gz"), Compression::Gzip).unwrap();
    let zst = build_layer(&ctx, &temp.path().join("l.tar.zst"), Compression::Zstd).unwrap();
    assert_eq!(gz.diff_id, zst.diff_id);
    assert_ne!(gz.digest, zst.digest);

    let mut tar = Vec::new();
    zstd::stream::read::Decoder::new(fs::File::open(&zst.path).unwrap())
        .unwrap()
        .read_to_end(&mut tar)
        .unwrap();
    assert!(!tar.is_empty());
}

#[test]
fn test_config_cannot_write_outside_workdir() {
    let temp = TempDir::new().unwrap();
    let workdir = temp.path().join("nested/root");

    for yaml in [
        "paths: [{ path: /../escaped, type: directory }]",
        "accounts: { users: [{ username: '../../evil', uid: 1000 }] }",
    ] {
        let mut ctx = BuildContext::new(&workdir, host_options()).unwrap();
        let builder = Builder::new(FakePackageManager::new());
        let err = builder.build(&mut ctx, &config(yaml)).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some(), "{}", yaml);
        assert!(builder.package_manager().calls().is_empty());
    }

    assert!(!temp.path().join("nested/escaped").exists());
    assert!(!temp.path().join("evil").exists());
}
