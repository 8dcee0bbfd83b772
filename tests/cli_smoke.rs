use std::path::PathBuf;

fn scenium_exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_scenium")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "scenium.exe"
            } else {
                "scenium"
            });
            p
        })
}

#[test]
fn cli_demo_writes_png() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();
    let out_path = dir.join("demo.png");
    let _ = std::fs::remove_file(&out_path);

    let out_arg = out_path.to_string_lossy().to_string();
    let status = std::process::Command::new(scenium_exe())
        .args([
            "demo",
            "--out",
            out_arg.as_str(),
            "--cycles",
            "3",
            "--frame-delay-ms",
            "1",
        ])
        .status()
        .unwrap();

    assert!(status.success());
    assert!(out_path.exists());
}

#[test]
fn cli_snapshot_writes_json() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();
    let out_path = dir.join("snapshot.json");
    let _ = std::fs::remove_file(&out_path);

    let out_arg = out_path.to_string_lossy().to_string();
    let status = std::process::Command::new(scenium_exe())
        .args(["snapshot", "--out", out_arg.as_str()])
        .status()
        .unwrap();

    assert!(status.success());
    let json = std::fs::read_to_string(&out_path).unwrap();
    assert!(json.contains("ContainerVisual"));
    assert!(json.contains("DrawRectangle"));
}
