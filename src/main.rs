fn main() {
    particle_review::cli::run();
}
