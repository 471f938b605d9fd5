use std::fs;
use std::path::{Path, PathBuf};

use kconfig_matrix::config::ConfigDoc;
use kconfig_matrix::error::ErrorKind;
use kconfig_matrix::project::Project;

fn write(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, body).unwrap();
}

fn setup(build_toml: &str) -> (tempfile::TempDir, PathBuf) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path().to_path_buf();
    write(&root.join("build.toml"), build_toml);
    write(&root.join("p/meta.xml"), "<kernel/>\n");
    write(&root.join("p/android-base.config"), "CONFIG_A=y\n");
    write(&root.join("p/android-base-foo.config"), "CONFIG_B=y\n");
    (tmp, root)
}

const BUILD: &str = r#"
[workspace]
out_dir = "out"

[kernel_config.p]
dir = "p"
meta = "meta.xml"
srcs = ["android-base.config", "android-base-foo.config"]
"#;

#[test]
fn single_module_renders_two_ordered_build_statements() {
    let (_tmp, root) = setup(BUILD);
    let project = Project::load(&root.join("build.toml"), &[]).unwrap();
    let text = project.render_ninja().unwrap();

    let src = root.join("p");
    let out = root.join("out/p");
    let generated = out.join("gen");
    let version = generated.join("p.version.txt");

    let fixup = format!(
        "\nbuild {cond} | {version}: kconfig_xml_fixup {meta}\n  description = p: Fixup kernel config meta\n  outputVersion = {version}\n",
        cond = generated.join("meta.xml").display(),
        meta = src.join("meta.xml").display(),
        version = version.display(),
    );
    assert!(text.contains(&fixup), "{text}");

    let assemble = format!(
        "\nbuild {final_out}: assemble_vintf {cond} | {a} {b} {version}\n  description = p: Framework Compatibility Matrix kernel fragment\n  flags = --kernel=$$(cat {version}):{a}:{b}\n",
        final_out = out.join("p.xml").display(),
        cond = generated.join("meta.xml").display(),
        a = src.join("android-base.config").display(),
        b = src.join("android-base-foo.config").display(),
        version = version.display(),
    );
    assert!(text.contains(&assemble), "{text}");

    let fixup_at = text.find("kconfig_xml_fixup /").unwrap();
    let assemble_at = text.find("assemble_vintf /").unwrap();
    assert!(fixup_at < assemble_at);

    assert!(
        text.contains(&format!(
            "\nbuild p: phony {} {}\n",
            generated.join("meta.xml").display(),
            out.join("p.xml").display()
        )),
        "{text}"
    );
}

#[test]
fn rendering_twice_is_byte_identical() {
    let (_tmp, root) = setup(BUILD);
    let a = Project::load(&root.join("build.toml"), &[])
        .unwrap()
        .render_ninja()
        .unwrap();
    let b = Project::load(&root.join("build.toml"), &[])
        .unwrap()
        .render_ninja()
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn fixed_naming_uses_fixed_file_names() {
    let (_tmp, root) = setup(
        r#"
[kernel_config.p]
dir = "p"
meta = "meta.xml"
srcs = ["android-base.config"]
naming = "fixed"
"#,
    );
    let project = Project::load(&root.join("build.toml"), &[]).unwrap();
    let graph = project.generate().unwrap();
    let outputs: Vec<PathBuf> = graph
        .actions()
        .iter()
        .flat_map(|a| a.all_outputs().cloned())
        .collect();
    let out = root.join("out/p");
    assert_eq!(
        outputs,
        vec![
            out.join("gen/conditional.xml"),
            out.join("gen/version.txt"),
            out.join("matrix.xml"),
        ]
    );
}

#[test]
fn module_without_sources_has_empty_flags() {
    let (_tmp, root) = setup(
        r#"
[kernel_config.p]
dir = "p"
meta = "meta.xml"
"#,
    );
    let text = Project::load(&root.join("build.toml"), &[])
        .unwrap()
        .render_ninja()
        .unwrap();
    assert!(text.contains("  flags = \n"), "{text}");
}

#[test]
fn host_bin_dir_tools_become_command_deps() {
    let (_tmp, root) = setup(
        r#"
[tools]
host_bin_dir = "host/bin"

[kernel_config.p]
dir = "p"
meta = "meta.xml"
"#,
    );
    let text = Project::load(&root.join("build.toml"), &[])
        .unwrap()
        .render_ninja()
        .unwrap();
    let bin = root.join("host/bin");
    assert!(
        text.contains(&format!(
            "kconfigXmlFixupCmd = {}\n",
            bin.join("kconfig_xml_fixup").display()
        )),
        "{text}"
    );
    assert!(
        text.contains(&format!(
            " {}\n  description = p: Fixup",
            bin.join("kconfig_xml_fixup").display()
        )),
        "{text}"
    );
}

#[test]
fn in_memory_doc_generates_without_files() {
    let doc = ConfigDoc::parse(
        "/virtual/build.toml",
        r#"
[kernel_config.p]
meta = "meta.xml"
srcs = ["a.config"]
"#,
    )
    .unwrap();
    let project = Project::from_docs(doc, Vec::new()).unwrap();
    let graph = project.generate().unwrap();
    assert_eq!(graph.len(), 2);
    let assemble = graph
        .producer_of(Path::new("/virtual/out/p/p.xml"))
        .expect("assemble action");
    assert_eq!(
        assemble.args["flags"],
        "--kernel=$(cat /virtual/out/p/gen/p.version.txt):/virtual/a.config"
    );
}

#[test]
fn workspace_path_with_space_is_rejected_before_rendering() {
    let doc = ConfigDoc::parse(
        "/my src/build.toml",
        r#"
[kernel_config.p]
meta = "meta.xml"
srcs = ["a.config"]
"#,
    )
    .unwrap();
    let project = Project::from_docs(doc, Vec::new()).unwrap();
    let err = project.render_ninja().expect_err("space in command path");
    assert_eq!(err.kind(), ErrorKind::Config);
    let msg = err.to_string();
    assert!(msg.contains("/my src/"), "{msg}");
    assert!(msg.contains("' '"), "{msg}");
}

#[test]
fn meta_path_with_space_is_quoted_by_ninja() {
    let doc = ConfigDoc::parse(
        "/virtual/build.toml",
        r#"
[kernel_config.p]
meta = "vendor meta/kernel.xml"
"#,
    )
    .unwrap();
    let text = Project::from_docs(doc, Vec::new())
        .unwrap()
        .render_ninja()
        .unwrap();
    assert!(
        text.contains(": kconfig_xml_fixup /virtual/vendor$ meta/kernel.xml\n"),
        "{text}"
    );
    assert!(
        text.contains("  outputVersion = /virtual/out/p/gen/p.version.txt\n"),
        "{text}"
    );
}
