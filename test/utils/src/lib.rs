pub fn stream_fixture() -> Vec<&'static str> {
    return vec!["Hel", "lo, ", "world", "[END]"];
}

pub fn data_url_fixture() -> &'static str {
    return "data:text/plain;base64,aGk=";
}
