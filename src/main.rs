fn main() {
    moneta::run();
}
