//! Stand-in for the `kestrel` CLI's hidden `__dispatch-tool` re-exec path,
//! built only so sandbox integration tests can spawn a real subprocess
//! without pulling in the `cli` crate.

fn main() {
    let mut args = std::env::args().skip(1);
    let subcommand = args.next().unwrap_or_default();
    if subcommand == kestrel_core::sandbox::exec::DISPATCH_SUBCOMMAND {
        let locator = args.next().unwrap_or_default();
        kestrel_core::sandbox::dispatch_main(&locator);
    }
    std::process::exit(1);
}
