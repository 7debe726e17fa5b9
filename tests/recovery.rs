use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_storage::nor_flash::NorFlashErrorKind;
use wofs::cfg::fs_cfg::ERASED_RUN_THRESHOLD;
use wofs::fs::{FsckStatus, Problem};
use wofs::mem::ram::RamFlash;
use wofs::{FsError, Nor, OpenFlags, Volume, VolumeConfig};

type RamVolume = Volume<NoopRawMutex, Nor<RamFlash<Vec<u8>>>>;

const SIZE: u32 = 32 * 1024;

fn create_flags() -> OpenFlags {
    OpenFlags::WRONLY | OpenFlags::CREATE
}

fn mount(flash: RamFlash<Vec<u8>>) -> RamVolume {
    Volume::mount(Nor::new(flash).unwrap(), VolumeConfig::wofs(0, SIZE)).unwrap()
}

/// Drop the volume without closing anything and mount the same flash again.
fn power_cycle(vol: RamVolume) -> RamVolume {
    let mut flash = vol.unmount().into_inner();
    flash.restore_power();
    mount(flash)
}

fn read_all(vol: &RamVolume, name: &str) -> Vec<u8> {
    let fd = vol.open(name, OpenFlags::RDONLY).unwrap();
    let mut buf = vec![0u8; SIZE as usize];
    let n = vol.read(fd, &mut buf).unwrap();
    vol.close(fd).unwrap();
    buf.truncate(n);
    buf
}

#[test]
fn power_loss_before_close_is_repaired() {
    let vol = mount(RamFlash::new(vec![0u8; SIZE as usize]));
    let data: Vec<u8> = (0..1500u32).map(|i| (i % 200) as u8).collect();
    let fd = vol.open("trace.bin", create_flags()).unwrap();
    vol.write(fd, &data).unwrap();

    let vol = power_cycle(vol);
    assert_eq!(vol.open("trace.bin", OpenFlags::RDONLY), Err(FsError::NotFound));
    let report = vol.fsck(false).unwrap();
    assert_eq!(report.status, FsckStatus::CorruptionDetected);
    assert_eq!(report.problem, Some(Problem::Unfinalized { offset: 0 }));

    let report = vol.fsck(true).unwrap();
    assert_eq!(report.status, FsckStatus::Repaired);
    assert_eq!(report.repaired, 1);
    assert_eq!(read_all(&vol, "trace.bin"), data);

    // repaired volume is clean and accepts new files again
    assert_eq!(vol.fsck(false).unwrap().status, FsckStatus::Ok);
    let fd = vol.open("next", create_flags()).unwrap();
    vol.close(fd).unwrap();
}

#[test]
fn placeholder_blocks_new_files_until_repair() {
    let vol = mount(RamFlash::new(vec![0u8; SIZE as usize]));
    let fd = vol.open("done", create_flags()).unwrap();
    vol.write(fd, b"safe").unwrap();
    vol.close(fd).unwrap();
    let fd = vol.open("cut", create_flags()).unwrap();
    vol.write(fd, b"lost?").unwrap();

    let vol = power_cycle(vol);
    assert_eq!(read_all(&vol, "done"), b"safe");
    assert_eq!(
        vol.open("other", create_flags()),
        Err(FsError::CorruptionDetected)
    );
    vol.fsck(true).unwrap();
    assert_eq!(read_all(&vol, "cut"), b"lost?");
    let fd = vol.open("other", create_flags()).unwrap();
    vol.close(fd).unwrap();
}

#[test]
fn interrupted_program_keeps_what_reached_flash() {
    let mut flash = RamFlash::new(vec![0u8; SIZE as usize]);
    // "cut.bin\0" is 8 bytes, then sentinel and size: a 16 byte header
    flash.fail_after(16 + 300);
    let vol = mount(flash);
    let fd = vol.open("cut.bin", create_flags()).unwrap();
    assert_eq!(
        vol.write(fd, &[0x41u8; 1000]),
        Err(FsError::PhysicalIo(NorFlashErrorKind::Other))
    );
    assert_eq!(vol.size(fd).unwrap(), 0);

    let vol = power_cycle(vol);
    assert_eq!(vol.fsck(true).unwrap().status, FsckStatus::Repaired);
    assert_eq!(read_all(&vol, "cut.bin"), vec![0x41u8; 300]);
}

#[test]
fn failed_repair_leaves_the_placeholder() {
    let vol = mount(RamFlash::new(vec![0u8; SIZE as usize]));
    let fd = vol.open("cut.bin", create_flags()).unwrap();
    vol.write(fd, &[0x33u8; 700]).unwrap();

    let mut flash = vol.unmount().into_inner();
    flash.fail_after(0);
    let vol = mount(flash);
    assert_eq!(
        vol.fsck(true),
        Err(FsError::PhysicalIo(NorFlashErrorKind::Other))
    );

    let mut flash = vol.unmount().into_inner();
    // "cut.bin\0" and the sentinel come first, then the size field
    assert_eq!(&flash.as_bytes()[12..16], &[0xFF; 4]);
    flash.restore_power();
    let vol = mount(flash);
    let report = vol.fsck(true).unwrap();
    assert_eq!(report.status, FsckStatus::Repaired);
    assert_eq!(read_all(&vol, "cut.bin"), vec![0x33u8; 700]);
}

#[test]
fn trailing_erased_bytes_are_lost_by_repair() {
    let vol = mount(RamFlash::new(vec![0u8; SIZE as usize]));
    let mut data = b"header".to_vec();
    data.extend(std::iter::repeat(0xFF).take(ERASED_RUN_THRESHOLD as usize + 10));
    let fd = vol.open("padded", create_flags()).unwrap();
    vol.write(fd, &data).unwrap();

    let vol = power_cycle(vol);
    vol.fsck(true).unwrap();
    assert_eq!(read_all(&vol, "padded"), b"header");
}

#[test]
fn short_erased_run_inside_data_is_kept() {
    let vol = mount(RamFlash::new(vec![0u8; SIZE as usize]));
    let mut data = vec![0x10u8; 100];
    data.extend(std::iter::repeat(0xFF).take(ERASED_RUN_THRESHOLD as usize - 1));
    data.extend_from_slice(b"tail");
    let fd = vol.open("gappy", create_flags()).unwrap();
    vol.write(fd, &data).unwrap();

    let vol = power_cycle(vol);
    vol.fsck(true).unwrap();
    assert_eq!(read_all(&vol, "gappy"), data);
}

#[test]
fn crash_during_rewrite_keeps_old_version_until_repair() {
    let vol = mount(RamFlash::new(vec![0u8; SIZE as usize]));
    let fd = vol.open("cfg", create_flags()).unwrap();
    vol.write(fd, b"v1;").unwrap();
    vol.close(fd).unwrap();
    let fd = vol.open("cfg", OpenFlags::APPEND).unwrap();
    vol.write(fd, b"v2;").unwrap();

    let vol = power_cycle(vol);
    assert_eq!(read_all(&vol, "cfg"), b"v1;");

    let report = vol.fsck(true).unwrap();
    assert_eq!(report.status, FsckStatus::Repaired);
    assert_eq!((report.live, report.deleted), (1, 1));
    assert_eq!(read_all(&vol, "cfg"), b"v1;v2;");
    assert_eq!(vol.entries().count(), 1);
}

#[test]
fn corrupt_header_stops_lookup_and_fsck() {
    let vol = mount(RamFlash::new(vec![0u8; SIZE as usize]));
    let fd = vol.open("ok", create_flags()).unwrap();
    vol.write(fd, b"1234").unwrap();
    vol.close(fd).unwrap();
    let fd = vol.open("bad", create_flags()).unwrap();
    vol.close(fd).unwrap();

    let mut flash = vol.unmount().into_inner();
    // "ok" occupies 0..16; damage the second record's name
    flash.as_bytes_mut()[17] = 0x01;
    let vol = mount(flash);

    assert_eq!(read_all(&vol, "ok"), b"1234");
    assert_eq!(
        vol.open("missing", OpenFlags::RDONLY),
        Err(FsError::CorruptionDetected)
    );
    let report = vol.fsck(true).unwrap();
    assert_eq!(report.status, FsckStatus::CorruptionDetected);
    assert!(matches!(
        report.problem,
        Some(Problem::Malformed { offset: 16, .. })
    ));
    assert_eq!(vol.entries().last(), Some(Err(FsError::CorruptionDetected)));

    vol.format(false).unwrap();
    assert_eq!(vol.fsck(false).unwrap().status, FsckStatus::Ok);
}
