use edudesk_crypto::{decrypt_stream, encrypt_stream, unwrap_key, wrap_key, ContentKey, MasterKey};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

const PREFIX: [u8; 8] = [0xABu8; 8];

#[divan::bench(args = [1024, 65536, 1048576, 8388608])]
fn bench_encrypt_stream(bencher: divan::Bencher, size: usize) {
    let key = ContentKey::generate().unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut out = Vec::with_capacity(size + 4096);
            encrypt_stream(
                divan::black_box(&key),
                &PREFIX,
                divan::black_box(data.as_slice()),
                &mut out,
            )
            .unwrap();
            out
        });
}

#[divan::bench(args = [1024, 65536, 1048576, 8388608])]
fn bench_decrypt_stream(bencher: divan::Bencher, size: usize) {
    let key = ContentKey::generate().unwrap();
    let data = make_data(size);
    let mut encrypted = Vec::new();
    encrypt_stream(&key, &PREFIX, data.as_slice(), &mut encrypted).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut out = Vec::with_capacity(size);
            decrypt_stream(
                divan::black_box(&key),
                &PREFIX,
                divan::black_box(encrypted.as_slice()),
                &mut out,
            )
            .unwrap();
            out
        });
}

#[divan::bench]
fn bench_wrap_unwrap_key(bencher: divan::Bencher) {
    let master = MasterKey::from_bytes([0x42u8; 32]);
    let content_key = ContentKey::generate().unwrap();
    bencher.bench(|| {
        let wrapped = wrap_key(divan::black_box(&master), divan::black_box(&content_key)).unwrap();
        unwrap_key(&master, &wrapped).unwrap()
    });
}

fn main() {
    divan::main();
}
