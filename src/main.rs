fn main() {
    restwise_lib::run()
}
