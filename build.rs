// Windows の GStreamer MSVC 配布物をリンク対象に加える
fn main() {
    println!("cargo:rerun-if-env-changed=GSTREAMER_1_0_ROOT_MSVC_X86_64");
    if let Ok(root) = std::env::var("GSTREAMER_1_0_ROOT_MSVC_X86_64") {
        println!("cargo:rustc-link-search=native={}\\lib", root.trim_end_matches('\\'));
    }
}
