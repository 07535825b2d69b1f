fn main() {
    std::process::exit(gpo_pref_sync::run());
}
