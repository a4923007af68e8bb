use reconcile_managed::error::exit_code_for;

fn main() {
    match reconcile_managed::run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}
