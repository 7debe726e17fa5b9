use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use wofs::fs::FsckStatus;
use wofs::mem::ram::RamFlash;
use wofs::{FsError, Nor, OpenFlags, SeekFrom, Volume, VolumeConfig};

type RamVolume = Volume<NoopRawMutex, Nor<RamFlash<Vec<u8>>>>;

const CREATE: OpenFlags = OpenFlags::from_bits_truncate(
    OpenFlags::WRONLY.bits() | OpenFlags::CREATE.bits(),
);

fn volume(size: u32) -> RamVolume {
    let flash = RamFlash::new(vec![0u8; size as usize]);
    Volume::mount(Nor::new(flash).unwrap(), VolumeConfig::wofs(0, size)).unwrap()
}

fn write_file(vol: &RamVolume, name: &str, data: &[u8]) {
    let fd = vol.open(name, CREATE).unwrap();
    assert_eq!(vol.write(fd, data).unwrap(), data.len());
    vol.close(fd).unwrap();
}

fn read_file(vol: &RamVolume, name: &str) -> Vec<u8> {
    let fd = vol.open(name, OpenFlags::RDONLY).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 37];
    loop {
        let n = vol.read(fd, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    vol.close(fd).unwrap();
    out
}

#[test]
fn written_bytes_read_back_in_order() {
    let vol = volume(64 * 1024);
    let payloads: Vec<(String, Vec<u8>)> = [0usize, 1, 3, 64, 65, 1000, 4097]
        .iter()
        .map(|len| {
            let data = (0..*len).map(|i| (i * 7 % 256) as u8).collect();
            (format!("file{len}.bin"), data)
        })
        .collect();
    for (name, data) in &payloads {
        write_file(&vol, name, data);
    }
    for (name, data) in &payloads {
        assert_eq!(&read_file(&vol, name), data, "{name}");
    }
}

#[test]
fn several_writes_append_to_one_record() {
    let vol = volume(16 * 1024);
    let fd = vol.open("log.txt", CREATE).unwrap();
    for line in ["boot\n", "net up\n", "mqtt up\n"] {
        vol.write(fd, line.as_bytes()).unwrap();
    }
    vol.close(fd).unwrap();
    assert_eq!(read_file(&vol, "log.txt"), b"boot\nnet up\nmqtt up\n");
}

#[test]
fn lookup_ignores_ascii_case() {
    let vol = volume(16 * 1024);
    write_file(&vol, "LOG.TXT", b"upper");
    assert_eq!(read_file(&vol, "log.txt"), b"upper");
    let entry = vol.stat("Log.Txt").unwrap();
    assert_eq!(entry.name.as_str(), "LOG.TXT");
    assert_eq!(entry.size, 5);
}

#[test]
fn second_writer_is_busy_until_first_closes() {
    let vol = volume(16 * 1024);
    let first = vol.open("a", CREATE).unwrap();
    assert_eq!(vol.open("b", CREATE), Err(FsError::Busy));
    assert_eq!(vol.open("a", OpenFlags::APPEND), Err(FsError::Busy));
    assert_eq!(vol.fsck(true), Err(FsError::Busy));
    vol.close(first).unwrap();

    let second = vol.open("b", CREATE).unwrap();
    vol.close(second).unwrap();
}

#[test]
fn readers_share_the_volume_with_a_writer() {
    let vol = volume(16 * 1024);
    write_file(&vol, "cfg", b"settings");
    let writer = vol.open("log", CREATE).unwrap();
    let r1 = vol.open("cfg", OpenFlags::RDONLY).unwrap();
    let r2 = vol.open("CFG", OpenFlags::RDONLY).unwrap();
    vol.write(writer, b"entry").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(vol.read(r1, &mut buf).unwrap(), 8);
    assert_eq!(vol.read(r2, &mut buf[..3]).unwrap(), 3);
    for fd in [r1, r2, writer] {
        vol.close(fd).unwrap();
    }
}

#[test]
fn handle_pool_is_bounded() {
    let vol = volume(16 * 1024);
    write_file(&vol, "shared", b"x");
    let fds: Vec<_> = (0..8)
        .map(|_| vol.open("shared", OpenFlags::RDONLY).unwrap())
        .collect();
    assert_eq!(
        vol.open("shared", OpenFlags::RDONLY),
        Err(FsError::TooManyOpenFiles)
    );
    vol.close(fds[0]).unwrap();
    let fd = vol.open("shared", OpenFlags::RDONLY).unwrap();
    vol.close(fd).unwrap();
    for fd in &fds[1..] {
        vol.close(*fd).unwrap();
    }
}

#[test]
fn unlink_hides_file_but_keeps_usage() {
    let vol = volume(16 * 1024);
    write_file(&vol, "tmp", b"scratch data");
    write_file(&vol, "keep", b"k");
    let before = vol.usage().unwrap();

    vol.unlink("TMP").unwrap();
    assert_eq!(vol.open("tmp", OpenFlags::RDONLY), Err(FsError::NotFound));
    assert_eq!(vol.stat("tmp"), Err(FsError::NotFound));
    assert_eq!(vol.unlink("tmp"), Err(FsError::NotFound));
    let names: Vec<_> = vol
        .entries()
        .map(|e| e.unwrap().name.as_str().to_owned())
        .collect();
    assert_eq!(names, ["keep"]);
    assert_eq!(vol.usage().unwrap(), before);

    vol.format(false).unwrap();
    assert_eq!(vol.usage().unwrap().used, 0);
}

#[test]
fn writes_behind_the_end_are_ignored() {
    let vol = volume(16 * 1024);
    let fd = vol.open("a", OpenFlags::RDWR | OpenFlags::CREATE).unwrap();
    vol.write(fd, b"0123456789").unwrap();
    assert_eq!(vol.seek(fd, SeekFrom::Start(4)).unwrap(), 4);
    assert_eq!(vol.write(fd, b"XXXX").unwrap(), 0);

    let mut buf = [0u8; 6];
    assert_eq!(vol.read(fd, &mut buf).unwrap(), 6);
    assert_eq!(&buf, b"456789");
    assert_eq!(vol.write(fd, b"!").unwrap(), 1);
    vol.close(fd).unwrap();
    assert_eq!(read_file(&vol, "a"), b"0123456789!");
}

#[test]
fn seek_past_end_is_rejected() {
    let vol = volume(16 * 1024);
    write_file(&vol, "a", b"abc");
    let fd = vol.open("a", OpenFlags::RDONLY).unwrap();
    assert_eq!(vol.seek(fd, SeekFrom::Start(4)), Err(FsError::InvalidSeek));
    assert_eq!(vol.seek(fd, SeekFrom::End(1)), Err(FsError::InvalidSeek));
    assert_eq!(vol.seek(fd, SeekFrom::End(-3)).unwrap(), 0);
    vol.close(fd).unwrap();
}

#[test]
fn clean_fsck_is_idempotent_and_read_only() {
    let vol = volume(16 * 1024);
    write_file(&vol, "a", b"first");
    write_file(&vol, "b", b"second");
    vol.unlink("a").unwrap();
    let before = vol.unmount().into_inner().into_inner();

    let flash = RamFlash::from_image(before.clone());
    let vol: RamVolume =
        Volume::mount(Nor::new(flash).unwrap(), VolumeConfig::wofs(0, 16 * 1024)).unwrap();
    for _ in 0..2 {
        let report = vol.fsck(false).unwrap();
        assert_eq!(report.status, FsckStatus::Ok);
        assert_eq!(report.problem, None);
    }
    assert_eq!(vol.unmount().into_inner().into_inner(), before);
}

#[test]
fn partial_format_reclaims_a_full_volume() {
    let vol = volume(16 * 1024);
    let chunk = [0xA5u8; 512];
    let mut n = 0;
    loop {
        match vol.open(&format!("f{n}"), CREATE) {
            Ok(fd) => {
                let _ = vol.write(fd, &chunk);
                vol.close(fd).unwrap();
                n += 1;
            }
            Err(e) => {
                assert_eq!(e, FsError::OutOfSpace);
                break;
            }
        }
    }
    assert!(n > 20);

    vol.format(false).unwrap();
    assert!(vol.entries().next().is_none());
    let big = vec![0x5Au8; 12 * 1024];
    write_file(&vol, "after", &big);
    assert_eq!(read_file(&vol, "after"), big);
}

#[test]
fn sixty_four_kib_scenario() {
    let vol = volume(64 * 1024);
    write_file(&vol, "a.txt", b"0123456789");
    write_file(&vol, "b.txt", b"abcdefghijklmnopqrst");
    vol.unlink("a.txt").unwrap();

    let mut dir = vol.opendir();
    let first = vol.readdir(&mut dir).unwrap().unwrap();
    assert_eq!((first.name.as_str(), first.size), ("b.txt", 20));
    assert_eq!(vol.readdir(&mut dir).unwrap(), None);
    vol.closedir(dir);
}

#[test]
fn rewrite_replaces_the_previous_version() {
    let vol = volume(16 * 1024);
    write_file(&vol, "state", b"v1");
    let fd = vol
        .open("state", OpenFlags::WRONLY | OpenFlags::TRUNC)
        .unwrap();
    vol.write(fd, b"v2").unwrap();
    // the old version stays readable until the new one is closed
    assert_eq!(read_file(&vol, "state"), b"v1");
    vol.close(fd).unwrap();

    assert_eq!(read_file(&vol, "state"), b"v2");
    assert_eq!(vol.entries().count(), 1);
    assert_eq!(vol.fsck(false).unwrap().deleted, 1);
}

#[test]
fn names_are_validated_before_flash_is_touched() {
    let vol = volume(16 * 1024);
    let long = "x".repeat(33);
    assert_eq!(vol.open(&long, CREATE), Err(FsError::InvalidName));
    assert_eq!(vol.open("new\nline", CREATE), Err(FsError::InvalidName));
    assert_eq!(vol.unlink(""), Err(FsError::InvalidName));
    assert_eq!(vol.usage().unwrap().used, 0);
}

#[test]
fn mounts_from_json_config_at_an_offset() {
    let config =
        VolumeConfig::from_json(br#"{"kind":"wofs","base":8192,"max_size":8192}"#).unwrap();
    let flash = RamFlash::new(vec![0u8; 16 * 1024]);
    let vol: RamVolume = Volume::mount(Nor::new(flash).unwrap(), config).unwrap();
    write_file(&vol, "x", b"window");
    let raw = vol.unmount().into_inner().into_inner();
    assert!(raw[..8192].iter().all(|b| *b == 0xFF));
    assert_eq!(&raw[8192..8194], b"x\0");
}

#[test]
fn window_outside_medium_fails_mount() {
    let flash = RamFlash::new(vec![0u8; 8192]);
    let result: Result<RamVolume, _> =
        Volume::mount(Nor::new(flash).unwrap(), VolumeConfig::wofs(4096, 8192));
    assert!(matches!(result, Err(FsError::InvalidConfig)));
}
