mod decode_cases;
mod roundtrip;
