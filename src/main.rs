fn main() {
    pi_capture_lib::run()
}
