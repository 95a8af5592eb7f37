fn main() {
    icelab_routines::cli::run();
}
