mod application;
mod presentation;

fn main() -> fini_core::Result<()> {
    application::run()
}
